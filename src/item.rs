use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Priority class of an item
///
/// A is the mechanical class (longest service), B electrical, C bodywork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Class {
    A,
    B,
    C,
}

impl Class {
    /// All classes in base order
    pub const ALL: [Class; 3] = [Class::A, Class::B, Class::C];

    /// Position of the class in per-class tables
    pub const fn index(self) -> usize {
        match self {
            Class::A => 0,
            Class::B => 1,
            Class::C => 2,
        }
    }

    /// Letter used in the event log
    pub const fn letter(self) -> char {
        match self {
            Class::A => 'A',
            Class::B => 'B',
            Class::C => 'C',
        }
    }

    /// Base service length in time units, identical for every phase
    pub const fn base_units(self) -> u32 {
        match self {
            Class::A => 5,
            Class::B => 3,
            Class::C => 1,
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A unit of work flowing through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Item {
    pub id: u64,
    pub class: Class,
}

impl Item {
    pub fn new(id: u64, class: Class) -> Self {
        Self { id, class }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}({})", self.id, self.class)
    }
}

/// Processing step of the four-phase pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Paperwork on arrival; gated by the workshop slots
    Reception,
    /// Repair; gated by the mechanics
    Repair,
    /// Cleaning; gated by the cleaners
    Cleaning,
    /// Final review and hand-back; gated by the reviewers
    Delivery,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Reception,
        Phase::Repair,
        Phase::Cleaning,
        Phase::Delivery,
    ];

    /// Phase number as printed in the event log (1..=4)
    pub const fn number(self) -> u8 {
        match self {
            Phase::Reception => 1,
            Phase::Repair => 2,
            Phase::Cleaning => 3,
            Phase::Delivery => 4,
        }
    }

    pub const fn index(self) -> usize {
        self.number() as usize - 1
    }

    pub const fn name(self) -> &'static str {
        match self {
            Phase::Reception => "reception",
            Phase::Repair => "repair",
            Phase::Cleaning => "cleaning",
            Phase::Delivery => "delivery",
        }
    }

    pub const fn is_first(self) -> bool {
        matches!(self, Phase::Reception)
    }

    pub const fn is_last(self) -> bool {
        matches!(self, Phase::Delivery)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Issues globally unique item ids across all generators, starting at 1
#[derive(Debug, Default)]
pub struct IdIssuer {
    last: AtomicU64,
}

impl IdIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}
