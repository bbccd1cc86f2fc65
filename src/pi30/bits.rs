use std::collections::BTreeSet;

use log::warn;

/// Device status bits from field 16 of a status reply, 8 characters
/// written b7 first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBits {
    pub pv_or_ac_powering_load: bool,
    pub config_changed: bool,
    pub scc_fw_updated: bool,
    pub load_on: bool,
    pub charging_on: bool,
    pub scc_charging_on: bool,
    pub ac_charging_on: bool,
}

impl StatusBits {
    pub fn parse(bits: &str) -> Option<Self> {
        let bits = bits.as_bytes();
        if bits.len() != 8 {
            return None;
        }
        // b0 is the last character
        let b = |i: usize| bits[7 - i] == b'1';

        Some(Self {
            pv_or_ac_powering_load: b(7),
            config_changed: b(6),
            scc_fw_updated: b(5),
            load_on: b(4),
            charging_on: b(2),
            scc_charging_on: b(1),
            ac_charging_on: b(0),
        })
    }

    /// b2 b1 b0 as a number, 0..=7.
    pub fn charging_mode(&self) -> u8 {
        (self.charging_on as u8) << 2 | (self.scc_charging_on as u8) << 1 | self.ac_charging_on as u8
    }
}

pub fn charging_mode_label(mode: u8) -> &'static str {
    match mode {
        0 => "No charging",
        5 => "AC only",
        6 => "SCC only",
        7 => "SCC + AC",
        _ => "Unknown",
    }
}

/// Field 20 of a status reply: b10, b9, b8 left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryBits {
    pub charging_to_float: bool,
    pub inverter_on: bool,
    pub dustproof_installed: bool,
}

impl SecondaryBits {
    pub fn parse(bits: &str) -> Option<Self> {
        let bits = bits.as_bytes();
        if bits.len() != 3 {
            return None;
        }

        Some(Self {
            charging_to_float: bits[0] == b'1',
            inverter_on: bits[1] == b'1',
            dustproof_installed: bits[2] == b'1',
        })
    }
}

pub const NO_WARNINGS: &str = "No warnings";

const RESERVED: &str = "Reserved";

pub const WARNINGS: [&str; 36] = [
    "Inverter fault / Overcharge current",
    "Battery over-temperature",
    "Battery under-voltage",
    "Battery over-voltage",
    "PV input over-voltage",
    "Battery temp too low",
    "Battery temp too high",
    RESERVED, // 7
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED, // 19
    "PV low loss warning",
    "PV derating (high PV)",
    "Derating (high temp)",
    "Battery temperature low warning",
    "Battery disconnect",
    RESERVED, // 25
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED, // 29
    "Battery low warning",
    "Load short circuit fault",
    "DSP communication fault",
    RESERVED,
    RESERVED,
    RESERVED,
];

/// One character per bit, '1' meaning active. Characters past the end of
/// the table are ignored.
pub fn decode_warnings(bits: &str) -> String {
    let active: Vec<&str> = bits
        .bytes()
        .zip(WARNINGS.iter())
        .filter(|(bit, _)| *bit == b'1')
        .map(|(_, message)| *message)
        .collect();

    if active.is_empty() {
        NO_WARNINGS.to_string()
    } else {
        active.join(", ")
    }
}

pub fn mode_label(code: char) -> Option<&'static str> {
    let label = match code {
        'P' => "Power On",
        'S' => "Standby",
        'L' => "Line",
        'B' => "Battery",
        'F' => "Fault",
        'H' => "Power Saving",
        'D' => "Shutdown",
        'C' => "Charge",
        'Y' => "Bypass",
        'E' => "ECO",
        _ => return None,
    };
    Some(label)
}

const ENABLED_MARKER: char = 'E';
const DISABLED_MARKER: char = 'D';

/// Decoded flag-status reply such as `EakxyzDbjuvwd`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    pub enabled: BTreeSet<char>,
    pub disabled: BTreeSet<char>,
}

impl FlagSet {
    pub fn parse(input: &str) -> Self {
        let mut set = Self::default();
        let mut current: Option<char> = None;

        for c in input.chars() {
            match c {
                ENABLED_MARKER | DISABLED_MARKER => current = Some(c),
                letter => match current {
                    Some(ENABLED_MARKER) => {
                        set.enabled.insert(letter);
                    }
                    Some(_) => {
                        set.disabled.insert(letter);
                    }
                    None => {
                        warn!("flag letter {:?} before any state marker", letter);
                    }
                },
            }
        }

        set
    }

    /// `Some(true)` if enabled, `Some(false)` if disabled, `None` if the
    /// reply did not mention the letter.
    pub fn state(&self, letter: char) -> Option<bool> {
        if self.enabled.contains(&letter) {
            Some(true)
        } else if self.disabled.contains(&letter) {
            Some(false)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits() {
        let bits = StatusBits::parse("10010110").unwrap();
        assert!(bits.pv_or_ac_powering_load);
        assert!(!bits.config_changed);
        assert!(!bits.scc_fw_updated);
        assert!(bits.load_on);
        assert!(bits.charging_on);
        assert!(bits.scc_charging_on);
        assert!(!bits.ac_charging_on);
        assert_eq!(bits.charging_mode(), 6);
        assert_eq!(charging_mode_label(bits.charging_mode()), "SCC only");

        assert!(StatusBits::parse("0101").is_none());
    }

    #[test]
    fn charging_mode_labels() {
        assert_eq!(charging_mode_label(0), "No charging");
        assert_eq!(charging_mode_label(5), "AC only");
        assert_eq!(charging_mode_label(7), "SCC + AC");
        for unknown in [1, 2, 3, 4] {
            assert_eq!(charging_mode_label(unknown), "Unknown");
        }
    }

    #[test]
    fn secondary_bits() {
        let bits = SecondaryBits::parse("010").unwrap();
        assert!(!bits.charging_to_float);
        assert!(bits.inverter_on);
        assert!(!bits.dustproof_installed);
        assert!(SecondaryBits::parse("0100").is_none());
    }

    #[test]
    fn warnings() {
        assert_eq!(decode_warnings(&"0".repeat(36)), NO_WARNINGS);
        assert_eq!(decode_warnings(""), NO_WARNINGS);

        let mut bits = vec![b'0'; 36];
        bits[24] = b'1';
        bits[1] = b'1';
        let bits = String::from_utf8(bits).unwrap();
        assert_eq!(
            decode_warnings(&bits),
            "Battery over-temperature, Battery disconnect"
        );

        assert_eq!(decode_warnings("01"), "Battery over-temperature");
    }

    #[test]
    fn modes() {
        assert_eq!(mode_label('B'), Some("Battery"));
        assert_eq!(mode_label('E'), Some("ECO"));
        assert_eq!(mode_label('Q'), None);
    }

    #[test]
    fn flag_set() {
        let flags = FlagSet::parse("EabcDxyz");
        assert_eq!(flags.enabled, ['a', 'b', 'c'].into_iter().collect());
        assert_eq!(flags.disabled, ['x', 'y', 'z'].into_iter().collect());
        assert_eq!(flags.state('a'), Some(true));
        assert_eq!(flags.state('z'), Some(false));
        assert_eq!(flags.state('k'), None);

        let flags = FlagSet::parse("DkEa");
        assert_eq!(flags.state('k'), Some(false));
        assert_eq!(flags.state('a'), Some(true));

        assert_eq!(FlagSet::parse(""), FlagSet::default());

        // letters before any marker are logged and skipped
        let flags = FlagSet::parse("aEb");
        assert_eq!(flags.state('a'), None);
        assert_eq!(flags.state('b'), Some(true));
    }
}
