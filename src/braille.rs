//! Braille cell patterns and the symbol stream fed to the layout engine.
//!
//! A braille cell is a 2x3 grid of dots, numbered column-major:
//!
//! ```text
//! 1 4
//! 2 5
//! 3 6
//! ```
//!
//! Unicode braille characters (U+2800..=U+28FF) encode the punched dots as a
//! bitmask offset from U+2800; dots 7 and 8 of eight-dot braille are masked
//! off since the embosser only has six punch positions.

/// One of the six dot positions of a braille cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dot {
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
}

impl Dot {
    /// All dots in generation order (left column top to bottom, then right).
    pub const ALL: [Dot; 6] = [
        Dot::One,
        Dot::Two,
        Dot::Three,
        Dot::Four,
        Dot::Five,
        Dot::Six,
    ];

    fn mask_bit(self) -> u8 {
        match self {
            Dot::One => 0x01,
            Dot::Two => 0x02,
            Dot::Three => 0x04,
            Dot::Four => 0x08,
            Dot::Five => 0x10,
            Dot::Six => 0x20,
        }
    }

    /// Column index within the cell: 0 for dots 1-3, 1 for dots 4-6.
    pub fn column(self) -> u8 {
        match self {
            Dot::One | Dot::Two | Dot::Three => 0,
            Dot::Four | Dot::Five | Dot::Six => 1,
        }
    }

    /// Row index within the cell, 0 at the top.
    pub fn row(self) -> u8 {
        match self {
            Dot::One | Dot::Four => 0,
            Dot::Two | Dot::Five => 1,
            Dot::Three | Dot::Six => 2,
        }
    }
}

/// The punch mask of a single braille cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPattern {
    mask: u8,
}

impl CellPattern {
    /// A cell with no punched dots (the braille space).
    pub const BLANK: CellPattern = CellPattern { mask: 0 };

    /// Builds a pattern from a raw 6-bit mask; higher bits are discarded.
    pub fn from_mask(mask: u8) -> Self {
        Self { mask: mask & 0x3F }
    }

    /// Decodes a Unicode braille character, or `None` for anything outside
    /// the braille block.
    pub fn from_braille_char(c: char) -> Option<Self> {
        let code = c as u32;
        if (0x2800..=0x28FF).contains(&code) {
            Some(Self::from_mask((code - 0x2800) as u8))
        } else {
            None
        }
    }

    /// Whether the given dot position is punched.
    pub fn dot(self, dot: Dot) -> bool {
        self.mask & dot.mask_bit() != 0
    }

    /// Whether any dot is punched at all.
    pub fn is_blank(self) -> bool {
        self.mask == 0
    }
}

/// One element of the layout input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// Explicit line break: reset to the left margin, advance one row.
    LineBreak,
    /// A braille cell to place at the cursor.
    Cell(CellPattern),
}

/// Parses Unicode braille text into the symbol stream.
///
/// Newlines become [`Symbol::LineBreak`]; carriage returns are dropped.
/// Any other non-braille character is skipped with a warning, since the
/// text-to-braille mapping is the responsibility of the caller.
pub fn parse_symbols(text: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for c in text.chars() {
        match c {
            '\n' => symbols.push(Symbol::LineBreak),
            '\r' => {}
            c => match CellPattern::from_braille_char(c) {
                Some(pattern) => symbols.push(Symbol::Cell(pattern)),
                None => tracing::warn!("skipping non-braille character {c:?}"),
            },
        }
    }
    symbols
}
