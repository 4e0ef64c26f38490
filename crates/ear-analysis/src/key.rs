//! Pitch-class and key vocabulary.

use std::fmt;

/// One of the 12 chroma categories, independent of octave.
///
/// Declaration order (A first) is the order vote pools are scanned in, so it
/// also decides ties between equally weighted pitch classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum PitchClass {
    A,
    ASharp,
    B,
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
    ];

    /// Semitones above A (A = 0 ... G# = 11).
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Pitch class `index` semitones above A, wrapping.
    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    /// Pitch class from a MIDI note number.
    pub fn from_midi(note: u8) -> Self {
        // MIDI 69 is A4.
        Self::from_index((note as usize + 3) % 12)
    }

    /// Sharp spelling, e.g. `"C#"`.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; 12] = [
            "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
        ];
        NAMES[self.index()]
    }

    /// Parse a sharp or flat spelling (`"C#"`, `"Db"`, `"a"`).
    pub fn parse(name: &str) -> Option<Self> {
        let mut chars = name.trim().chars();
        let base = match chars.next()?.to_ascii_uppercase() {
            'A' => 0,
            'B' => 2,
            'C' => 3,
            'D' => 5,
            'E' => 7,
            'F' => 8,
            'G' => 10,
            _ => return None,
        };
        let index = match chars.as_str() {
            "" => base,
            "#" => base + 1,
            "b" => base + 11,
            _ => return None,
        };
        Some(Self::from_index(index))
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Major or minor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum KeyMode {
    Major,
    Minor,
}

impl KeyMode {
    /// `"M"` or `"m"`.
    pub fn short(self) -> &'static str {
        match self {
            KeyMode::Major => "M",
            KeyMode::Minor => "m",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KeyMode::Major => "major",
            KeyMode::Minor => "minor",
        }
    }
}

/// A tonic plus a mode, e.g. C# minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Key {
    pub tonic: PitchClass,
    pub mode: KeyMode,
}

impl Key {
    pub fn new(tonic: PitchClass, mode: KeyMode) -> Self {
        Self { tonic, mode }
    }

    pub fn major(tonic: PitchClass) -> Self {
        Self::new(tonic, KeyMode::Major)
    }

    pub fn minor(tonic: PitchClass) -> Self {
        Self::new(tonic, KeyMode::Minor)
    }

    /// Compact label: `"A"` for A major, `"C#m"` for C# minor.
    pub fn label(&self) -> String {
        match self.mode {
            KeyMode::Major => self.tonic.name().to_string(),
            KeyMode::Minor => format!("{}m", self.tonic.name()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tonic, self.mode.name())
    }
}
