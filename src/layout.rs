//! Pagination of a braille symbol stream into physical dot coordinates.

use crate::braille::{Dot, Symbol};
use crate::config::LayoutConfig;

/// One dot slot on a page, in millimetres from the page top-left corner.
///
/// Every cell contributes all six of its slots, punched or not; translation
/// later drops the unpunched ones. Positions are immutable once generated
/// and are consumed strictly in generation order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DotPosition {
    pub x: f64,
    pub y: f64,
    pub punch: bool,
    pub page: usize,
}

/// Lays braille cells onto pages with a fixed 2x3 dot geometry.
pub struct PageLayoutEngine {
    left_margin: f64,
    top_margin: f64,
    /// Largest x a cell may still start at without crossing the right margin.
    right_limit: f64,
    /// Largest y a row may still start at without crossing the bottom margin.
    bottom_limit: f64,
    /// Center-to-center distance between adjacent dots in a cell, mm.
    dot_pitch: f64,
    cell_width: f64,
    cell_height: f64,
    /// Cursor advance per cell (cell width plus inter-cell gap), mm.
    column_pitch: f64,
    /// Cursor advance per row (cell height plus inter-row gap), mm.
    row_pitch: f64,
}

impl PageLayoutEngine {
    pub fn new(config: &LayoutConfig) -> Self {
        let unit = config.unit_mm;
        let dot_pitch = (config.dot_diameter + config.dot_gap) * unit;
        let cell_width = (2.0 * config.dot_diameter + config.dot_gap) * unit;
        let cell_height = (3.0 * config.dot_diameter + 2.0 * config.dot_gap) * unit;
        Self {
            left_margin: config.left_margin,
            top_margin: config.top_margin,
            right_limit: config.paper_width - config.right_margin,
            bottom_limit: config.paper_height - config.bottom_margin,
            dot_pitch,
            cell_width,
            cell_height,
            column_pitch: cell_width + config.column_gap * unit,
            row_pitch: cell_height + config.row_gap * unit,
        }
    }

    /// Converts a symbol stream into per-page ordered dot positions.
    ///
    /// Page indices start at 0 and never decrease. An explicit line break
    /// always applies, even right above the bottom margin; only placing a
    /// cell can trigger the overflow checks.
    pub fn layout(&self, symbols: &[Symbol]) -> Vec<Vec<DotPosition>> {
        let mut pages: Vec<Vec<DotPosition>> = vec![Vec::new()];
        let mut page = 0usize;
        let mut x = self.left_margin;
        let mut y = self.top_margin;

        for symbol in symbols {
            match symbol {
                Symbol::LineBreak => {
                    x = self.left_margin;
                    y += self.row_pitch;
                }
                Symbol::Cell(pattern) => {
                    if x + self.cell_width > self.right_limit {
                        x = self.left_margin;
                        y += self.row_pitch;
                    }
                    if y + self.cell_height > self.bottom_limit {
                        page += 1;
                        pages.push(Vec::new());
                        x = self.left_margin;
                        y = self.top_margin;
                        tracing::debug!("page overflow, starting page {page}");
                    }
                    for dot in Dot::ALL {
                        pages[page].push(DotPosition {
                            x: x + f64::from(dot.column()) * self.dot_pitch,
                            y: y + f64::from(dot.row()) * self.dot_pitch,
                            punch: pattern.dot(dot),
                            page,
                        });
                    }
                    x += self.column_pitch;
                }
            }
        }

        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::braille::CellPattern;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// Small page for overflow tests: fits 2 cells per row, 2 rows per page.
    fn tiny_config() -> LayoutConfig {
        LayoutConfig {
            unit_mm: 1.0,
            dot_diameter: 1.0,
            dot_gap: 1.0,
            column_gap: 2.0,
            row_gap: 2.0,
            paper_width: 16.0,
            paper_height: 20.0,
            left_margin: 2.0,
            right_margin: 2.0,
            top_margin: 2.0,
            bottom_margin: 2.0,
        }
    }

    fn cells(n: usize) -> Vec<Symbol> {
        vec![Symbol::Cell(CellPattern::from_mask(0x3F)); n]
    }

    #[test]
    fn single_line_is_deterministic() {
        let engine = PageLayoutEngine::new(&LayoutConfig::default());
        let pages = engine.layout(&cells(5));
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].len(), 6 * 5);

        let first = pages[0][0];
        assert!(approx(first.x, 25.0), "first dot x = {}", first.x);
        assert!(approx(first.y, 25.0), "first dot y = {}", first.y);
        assert_eq!(first.page, 0);
    }

    #[test]
    fn dot_offsets_follow_cell_geometry() {
        let engine = PageLayoutEngine::new(&LayoutConfig::default());
        let pages = engine.layout(&cells(1));
        let dots = &pages[0];
        // Dot pitch with defaults is (1 + 1) * 1.5 = 3 mm.
        assert!(approx(dots[1].y, dots[0].y + 3.0)); // dot 2 one row down
        assert!(approx(dots[3].x, dots[0].x + 3.0)); // dot 4 one column right
        assert!(approx(dots[5].x, dots[0].x + 3.0));
        assert!(approx(dots[5].y, dots[0].y + 6.0)); // dot 6 bottom right
    }

    #[test]
    fn unpunched_slots_are_still_emitted() {
        let engine = PageLayoutEngine::new(&LayoutConfig::default());
        // Dots 1 and 4 punched.
        let pages = engine.layout(&[Symbol::Cell(CellPattern::from_mask(0x09))]);
        let punches: Vec<bool> = pages[0].iter().map(|d| d.punch).collect();
        assert_eq!(punches, vec![true, false, false, true, false, false]);
    }

    #[test]
    fn right_margin_wraps_to_next_row() {
        let engine = PageLayoutEngine::new(&tiny_config());
        // Third cell no longer fits on the 2-cell row.
        let pages = engine.layout(&cells(3));
        assert_eq!(pages.len(), 1);
        let third = pages[0][12];
        assert!(approx(third.x, 2.0));
        assert!(approx(third.y, 2.0 + 7.0)); // row pitch = 5 + 2
    }

    #[test]
    fn bottom_margin_starts_new_page() {
        let engine = PageLayoutEngine::new(&tiny_config());
        // 2 cells per row, 2 rows per page: the fifth cell overflows.
        let pages = engine.layout(&cells(5));
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 6 * 4);
        assert_eq!(pages[1].len(), 6);

        let first_on_new_page = pages[1][0];
        assert_eq!(first_on_new_page.page, 1);
        assert!(approx(first_on_new_page.x, 2.0));
        assert!(approx(first_on_new_page.y, 2.0));
    }

    #[test]
    fn page_indices_never_decrease() {
        let engine = PageLayoutEngine::new(&tiny_config());
        let pages = engine.layout(&cells(11));
        let mut last = 0;
        for dot in pages.iter().flatten() {
            assert!(dot.page >= last);
            last = dot.page;
        }
        assert_eq!(last, 2);
    }

    #[test]
    fn explicit_line_break_skips_margin_check() {
        let engine = PageLayoutEngine::new(&tiny_config());
        // Line breaks alone never allocate a page, no matter how many.
        let symbols = vec![Symbol::LineBreak; 10];
        let pages = engine.layout(&symbols);
        assert_eq!(pages.len(), 1);
        assert!(pages[0].is_empty());
    }
}
