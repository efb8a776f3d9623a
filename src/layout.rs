//! Keyboard layout lookup from device LED names
//!
//! OpenRGB keyboards name their LEDs "Key: A", "Key: Enter", "Key: Left
//! Shift" and so on. [`KeyboardLayout`] parses those names into a normalized
//! key-name map so callers can turn key captions into LED index sets for
//! targeted effects.

use std::collections::HashMap;

use crate::protocol::DeviceInfo;

const KEY_PREFIX: &str = "Key: ";

/// Normalized key-name → LED-index map for one device
#[derive(Debug, Clone, Default)]
pub struct KeyboardLayout {
    keys: HashMap<String, usize>,
}

impl KeyboardLayout {
    pub fn from_device(device: &DeviceInfo) -> Self {
        let mut keys = HashMap::new();

        for (index, led_name) in device.led_names.iter().enumerate() {
            if let Some(key_name) = led_name.strip_prefix(KEY_PREFIX) {
                keys.insert(normalize_key_name(key_name), index);
            }
        }

        if !keys.is_empty() {
            debug!(
                keys = %keys.len(),
                leds = %device.led_names.len(),
                device = %device.name,
                "keyboard layout mapped"
            );
        }

        Self { keys }
    }

    /// Look up a key caption like "A", "Enter" or "Left Shift"
    pub fn led_for_key(&self, key_name: &str) -> Option<usize> {
        self.keys.get(&normalize_key_name(key_name)).copied()
    }

    /// Resolve several captions, preserving order and skipping unknowns
    pub fn leds_for_keys<'a>(&self, key_names: impl IntoIterator<Item = &'a str>) -> Vec<usize> {
        key_names
            .into_iter()
            .filter_map(|name| self.led_for_key(name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Collapse the spellings OpenRGB firmwares use for the same key
///
/// "Left Shift" and "LSHIFT" both map to "LSHIFT"; "Number Pad 1" and
/// "Numpad 1" both map to "NUM1". A bare "Left" (the arrow key) has no
/// trailing space after the word and stays untouched.
fn normalize_key_name(name: &str) -> String {
    name.trim()
        .to_uppercase()
        .replace("LEFT ", "L")
        .replace("RIGHT ", "R")
        .replace("NUMBER PAD ", "NUM")
        .replace("NUMPAD ", "NUM")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Color;
    use crate::protocol::ZoneInfo;

    fn keyboard(led_names: &[&str]) -> DeviceInfo {
        DeviceInfo {
            device_type: 5,
            name: "Test Keyboard".to_owned(),
            vendor: "Test".to_owned(),
            description: String::new(),
            num_leds: led_names.len(),
            led_names: led_names.iter().map(|name| (*name).to_owned()).collect(),
            zones: vec![ZoneInfo {
                name: "Zone".to_owned(),
                zone_type: 2,
                leds_count: led_names.len(),
            }],
            colors: vec![Color::new(0, 0, 0); led_names.len()],
        }
    }

    #[test]
    fn maps_only_key_prefixed_leds() {
        let layout = KeyboardLayout::from_device(&keyboard(&["Key: A", "LED 1", "Key: Enter"]));

        assert_eq!(layout.len(), 2);
        assert_eq!(layout.led_for_key("A"), Some(0));
        assert_eq!(layout.led_for_key("Enter"), Some(2));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let layout = KeyboardLayout::from_device(&keyboard(&["Key: A"]));

        assert_eq!(layout.led_for_key("a"), Some(0));
        assert_eq!(layout.led_for_key("A"), Some(0));
    }

    #[test]
    fn unknown_key_is_none() {
        let layout = KeyboardLayout::from_device(&keyboard(&["Key: A"]));
        assert_eq!(layout.led_for_key("Z"), None);
    }

    #[test]
    fn modifier_spellings_converge() {
        let layout = KeyboardLayout::from_device(&keyboard(&["Key: Left Shift", "Key: Right Alt"]));

        assert_eq!(layout.led_for_key("Left Shift"), Some(0));
        assert_eq!(layout.led_for_key("LSHIFT"), Some(0));
        assert_eq!(layout.led_for_key("Right Alt"), Some(1));
        assert_eq!(layout.led_for_key("RALT"), Some(1));
    }

    #[test]
    fn number_pad_spellings_converge() {
        let layout = KeyboardLayout::from_device(&keyboard(&["Key: Number Pad 1"]));

        assert_eq!(layout.led_for_key("Numpad 1"), Some(0));
        assert_eq!(layout.led_for_key("Number Pad 1"), Some(0));
    }

    #[test]
    fn arrow_keys_keep_their_names() {
        let layout = KeyboardLayout::from_device(&keyboard(&["Key: Left", "Key: Right"]));

        assert_eq!(layout.led_for_key("Left"), Some(0));
        assert_eq!(layout.led_for_key("Right"), Some(1));
    }

    #[test]
    fn leds_for_keys_preserves_order_and_skips_unknowns() {
        let layout = KeyboardLayout::from_device(&keyboard(&["Key: A", "Key: B", "Key: Enter"]));

        assert_eq!(layout.leds_for_keys(vec!["Enter", "Zz", "A"]), vec![2, 0]);
    }

    #[test]
    fn device_without_key_names_is_empty() {
        let layout = KeyboardLayout::from_device(&keyboard(&["LED 0", "LED 1"]));

        assert!(layout.is_empty());
        assert_eq!(layout.leds_for_keys(vec!["A"]), Vec::<usize>::new());
    }
}
