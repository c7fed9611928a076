//! Pane geometry.
//!
//! Turns a window's weighted split tree into concrete cell rectangles. The
//! server uses this to keep every pane's PTY size in sync with the window
//! size; the renderer uses the same rectangles to place pane content.
//!
//! Siblings inside a split are separated by a one-cell border. The remaining
//! extent is divided proportionally to the weights, with the integer
//! remainder handed out left-to-right so the division is deterministic.

use crate::arrangement::{Node, SplitKind, Window};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// Compute the rectangle of every pane in the window for the given size
/// (rows, columns). With zoom active, the active pane covers everything.
pub fn compute_pane_rects(window: &Window, rows: u16, columns: u16) -> Vec<(usize, Rect)> {
    let full = Rect { x: 0, y: 0, width: columns.max(1), height: rows.max(1) };

    if window.zoom {
        if let Some(active) = window.active_pane_id() {
            return vec![(active, full)];
        }
    }

    let mut out = Vec::new();
    assign(&window.root, full, &mut out);
    out
}

/// Write the computed cell sizes back into the split weights. After this,
/// weights are cell counts, so a `resize-pane -L 2` moves the border by
/// exactly two cells.
pub fn sync_weights_to_sizes(window: &mut Window, rows: u16, columns: u16) {
    if window.zoom {
        return;
    }
    let full = Rect { x: 0, y: 0, width: columns.max(1), height: rows.max(1) };
    sync_node(&mut window.root, full);
}

fn sync_node(node: &mut Node, area: Rect) {
    if let Node::Split(split) = node {
        if split.children.is_empty() {
            return;
        }
        let extent = match split.kind {
            SplitKind::Horizontal => area.height,
            SplitKind::Vertical => area.width,
        };
        let parts = divide(extent, &split.weights);
        split.weights = parts.iter().map(|p| *p as usize).collect();

        let mut position = match split.kind {
            SplitKind::Horizontal => area.y,
            SplitKind::Vertical => area.x,
        };
        for (child, share) in split.children.iter_mut().zip(parts) {
            let child_area = match split.kind {
                SplitKind::Horizontal => {
                    Rect { x: area.x, y: position, width: area.width, height: share }
                }
                SplitKind::Vertical => {
                    Rect { x: position, y: area.y, width: share, height: area.height }
                }
            };
            sync_node(child, child_area);
            position += share + 1;
        }
    }
}

fn assign(node: &Node, area: Rect, out: &mut Vec<(usize, Rect)>) {
    match node {
        Node::Leaf(pane) => out.push((pane.pane_id, area)),
        Node::Split(split) => {
            if split.children.is_empty() {
                return;
            }
            let extent = match split.kind {
                SplitKind::Horizontal => area.height,
                SplitKind::Vertical => area.width,
            };
            let parts = divide(extent, &split.weights);
            let mut position = match split.kind {
                SplitKind::Horizontal => area.y,
                SplitKind::Vertical => area.x,
            };
            for (child, share) in split.children.iter().zip(parts) {
                let child_area = match split.kind {
                    SplitKind::Horizontal => {
                        Rect { x: area.x, y: position, width: area.width, height: share }
                    }
                    SplitKind::Vertical => {
                        Rect { x: position, y: area.y, width: share, height: area.height }
                    }
                };
                assign(child, child_area, out);
                // One separator cell between siblings.
                position += share + 1;
            }
        }
    }
}

/// Split `extent` cells over the weights, reserving one separator cell
/// between children. Every child gets at least one cell.
fn divide(extent: u16, weights: &[usize]) -> Vec<u16> {
    let n = weights.len() as u16;
    if n == 0 {
        return Vec::new();
    }
    let available = extent.saturating_sub(n - 1).max(n);
    let total_weight: usize = weights.iter().sum::<usize>().max(1);

    let mut parts: Vec<u16> = weights
        .iter()
        .map(|w| (((available as usize) * w) / total_weight).max(1) as u16)
        .collect();

    // Hand out the remainder left-to-right.
    let mut assigned: u16 = parts.iter().sum();
    let mut i = 0;
    let len = parts.len();
    while assigned < available && len != 0 {
        parts[i % len] += 1;
        assigned += 1;
        i += 1;
    }
    while assigned > available {
        let max_i = (0..parts.len()).max_by_key(|&j| parts[j]).unwrap_or(0);
        if parts[max_i] <= 1 {
            break;
        }
        parts[max_i] -= 1;
        assigned -= 1;
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrangement::tests::{test_pane, test_window};

    #[test]
    fn single_pane_fills_window() {
        let mut window = test_window();
        let id = {
            let pane = test_pane();
            let id = pane.pane_id;
            window.add_pane(pane, false);
            id
        };
        let rects = compute_pane_rects(&window, 24, 80);
        assert_eq!(rects, vec![(id, Rect { x: 0, y: 0, width: 80, height: 24 })]);
    }

    #[test]
    fn vertical_split_divides_columns() {
        let mut window = test_window();
        window.add_pane(test_pane(), false);
        window.add_pane(test_pane(), true);

        let rects = compute_pane_rects(&window, 24, 81);
        assert_eq!(rects.len(), 2);
        let (_, left) = rects[0];
        let (_, right) = rects[1];
        assert_eq!(left.height, 24);
        assert_eq!(right.height, 24);
        // One separator column between the two.
        assert_eq!(left.width + right.width + 1, 81);
        assert_eq!(right.x, left.width + 1);
    }

    #[test]
    fn weights_shift_the_division() {
        let mut window = test_window();
        window.add_pane(test_pane(), false);
        window.add_pane(test_pane(), true);

        // After a render pass, weights are cell counts.
        sync_weights_to_sizes(&mut window, 24, 81);
        // Grow the active (right) pane towards the left by 20 columns.
        window.change_size_for_active_pane(0, 0, 0, 20);

        let rects = compute_pane_rects(&window, 24, 81);
        let (_, left) = rects[0];
        let (_, right) = rects[1];
        assert_eq!(left.width, 20);
        assert_eq!(right.width, 60);
    }

    #[test]
    fn sync_weights_then_resize_moves_exact_cells() {
        let mut window = test_window();
        let first = {
            let pane = test_pane();
            let id = pane.pane_id;
            window.add_pane(pane, false);
            id
        };
        window.add_pane(test_pane(), true);
        sync_weights_to_sizes(&mut window, 24, 81);

        // tmux-style `resize-pane -R 2` from the left pane.
        window.set_active_pane(first);
        window.change_size_for_active_pane(0, 2, 0, 0);

        let rects = compute_pane_rects(&window, 24, 81);
        assert_eq!(rects[0].1.width, 42);
        assert_eq!(rects[1].1.width, 38);
    }

    #[test]
    fn zoom_gives_active_pane_everything() {
        let mut window = test_window();
        window.add_pane(test_pane(), false);
        window.add_pane(test_pane(), true);
        window.zoom = true;

        let rects = compute_pane_rects(&window, 24, 80);
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].0, window.active_pane_id().unwrap());
        assert_eq!(rects[0].1, Rect { x: 0, y: 0, width: 80, height: 24 });
    }

    #[test]
    fn every_pane_gets_at_least_one_cell() {
        let mut window = test_window();
        for i in 0..6 {
            window.add_pane(test_pane(), i % 2 == 0);
        }
        let rects = compute_pane_rects(&window, 10, 20);
        assert_eq!(rects.len(), 6);
        for (_, rect) in rects {
            assert!(rect.width >= 1);
            assert!(rect.height >= 1);
        }
    }
}
