use crate::item::Class;
use std::fmt;

/// Highest control value accepted from the feed
pub const MAX_CONTROL_VALUE: u8 = 9;

/// Decoded control value
///
/// | value | meaning                                  |
/// |-------|------------------------------------------|
/// | 0     | inactive, nothing is admitted            |
/// | 1-3   | only A / only B / only C                 |
/// | 4-6   | priority A / B / C, every class admitted |
/// | 7, 8  | keep the previous value                  |
/// | 9     | closed, no new admissions                |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Inactive,
    Only(Class),
    Priority(Class),
    /// 7 and 8; never stored as the current value
    Keep,
    Closed,
}

impl Mode {
    /// Decode a raw value; `None` outside 0..=9
    pub fn from_value(value: u8) -> Option<Mode> {
        let mode = match value {
            0 => Mode::Inactive,
            1 => Mode::Only(Class::A),
            2 => Mode::Only(Class::B),
            3 => Mode::Only(Class::C),
            4 => Mode::Priority(Class::A),
            5 => Mode::Priority(Class::B),
            6 => Mode::Priority(Class::C),
            7 | 8 => Mode::Keep,
            9 => Mode::Closed,
            _ => return None,
        };
        Some(mode)
    }

    /// Canonical raw value (`Keep` maps to 7)
    pub fn value(self) -> u8 {
        match self {
            Mode::Inactive => 0,
            Mode::Only(class) => 1 + class.index() as u8,
            Mode::Priority(class) => 4 + class.index() as u8,
            Mode::Keep => 7,
            Mode::Closed => 9,
        }
    }

    pub fn is_inactive(self) -> bool {
        matches!(self, Mode::Inactive)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Mode::Closed)
    }

    /// True when no stage may admit anything under the strict rules
    pub fn halts_dispatch(self) -> bool {
        self.is_inactive() || self.is_closed()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Inactive => f.write_str("inactive"),
            Mode::Only(class) => write!(f, "only {class}"),
            Mode::Priority(class) => write!(f, "priority {class}"),
            Mode::Keep => f.write_str("keep"),
            Mode::Closed => f.write_str("closed"),
        }
    }
}

/// Preference order and admission filter for one dispatch decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    order: [Class; 3],
    admitted: [bool; 3],
}

impl Policy {
    /// Base order A, B, C with every class admitted
    pub const BASE: Policy = Policy {
        order: Class::ALL,
        admitted: [true; 3],
    };

    pub fn for_mode(mode: Mode) -> Policy {
        match mode {
            Mode::Only(class) => {
                let mut admitted = [false; 3];
                admitted[class.index()] = true;
                Policy {
                    order: Class::ALL,
                    admitted,
                }
            }
            Mode::Priority(class) => Policy {
                order: promote(class),
                admitted: [true; 3],
            },
            Mode::Inactive | Mode::Keep | Mode::Closed => Policy::BASE,
        }
    }

    /// Classes in preference order, ignoring the filter
    pub fn order(&self) -> [Class; 3] {
        self.order
    }

    pub fn admits(&self, class: Class) -> bool {
        self.admitted[class.index()]
    }

    /// Admitted classes, most preferred first
    pub fn admitted(&self) -> impl Iterator<Item = Class> + '_ {
        self.order.iter().copied().filter(|class| self.admits(*class))
    }
}

/// Named class first, the other two in base order
fn promote(first: Class) -> [Class; 3] {
    let mut order = [first; 3];
    for (slot, class) in order[1..]
        .iter_mut()
        .zip(Class::ALL.into_iter().filter(|c| *c != first))
    {
        *slot = class;
    }
    order
}
