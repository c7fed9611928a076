//! Arrangement of panes.
//!
//! An arrangement is a list of windows; a window owns an ordered recursive
//! split tree whose leaves are panes. Horizontal splits stack their children
//! top-to-bottom, vertical splits left-to-right, and every child carries an
//! integer weight (>= 1) in its parent that decides its share of the extent.
//!
//! All clients share one arrangement but each has its own active window,
//! tracked in maps keyed by client id; the server removes a client's entries
//! on disconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::copy_mode::ScrollBuffer;
use crate::process::Process;

pub type ClientId = u64;

// Counters start at 1000 so ids can never be confused with window indexes.
static PANE_COUNTER: AtomicUsize = AtomicUsize::new(1000);
static WINDOW_COUNTER: AtomicUsize = AtomicUsize::new(1000);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SplitKind {
    /// Children stacked top-to-bottom.
    Horizontal,
    /// Children side by side, left-to-right.
    Vertical,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LayoutType {
    EvenHorizontal,
    EvenVertical,
    MainHorizontal,
    MainVertical,
    Tiled,
}

impl LayoutType {
    pub const ALL: [LayoutType; 5] = [
        LayoutType::EvenHorizontal,
        LayoutType::EvenVertical,
        LayoutType::MainHorizontal,
        LayoutType::MainVertical,
        LayoutType::Tiled,
    ];

    pub fn from_name(name: &str) -> Option<LayoutType> {
        match name {
            "even-horizontal" => Some(LayoutType::EvenHorizontal),
            "even-vertical" => Some(LayoutType::EvenVertical),
            "main-horizontal" => Some(LayoutType::MainHorizontal),
            "main-vertical" => Some(LayoutType::MainVertical),
            "tiled" => Some(LayoutType::Tiled),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayoutType::EvenHorizontal => "even-horizontal",
            LayoutType::EvenVertical => "even-vertical",
            LayoutType::MainHorizontal => "main-horizontal",
            LayoutType::MainVertical => "main-vertical",
            LayoutType::Tiled => "tiled",
        }
    }
}

/// One pane: a child process plus per-pane UI state.
pub struct Pane {
    pub pane_id: usize,
    pub process: Process,
    pub chosen_name: Option<String>,
    pub clock_mode: bool,
    pub scroll_buffer: Option<ScrollBuffer>,
}

/// Claim the next pane id. The id is needed before the process spawns, so
/// the child's PYMUX variable and the exit callback can carry it.
pub fn reserve_pane_id() -> usize {
    PANE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

impl Pane {
    pub fn new(process: Process) -> Pane {
        Pane::with_id(reserve_pane_id(), process)
    }

    pub fn with_id(pane_id: usize, process: Process) -> Pane {
        Pane { pane_id, process, chosen_name: None, clock_mode: false, scroll_buffer: None }
    }

    /// Name shown in the title and status bars: the chosen name, else the
    /// name of the process running inside.
    pub fn name(&self) -> String {
        if let Some(name) = &self.chosen_name {
            return name.clone();
        }
        self.process.get_name().unwrap_or_default()
    }

    pub fn display_scroll_buffer(&self) -> bool {
        self.scroll_buffer.is_some()
    }

    /// Freeze the screen content into a scroll buffer and divert input to
    /// it. With `scroll_up`, start one page above the live cursor.
    pub fn enter_copy_mode(&mut self, scroll_up: bool) {
        let document = self.process.create_copy_document();
        let mut buffer = ScrollBuffer::new(document, "copy".to_string());
        if scroll_up {
            let (_, rows) = self.process.size();
            buffer.move_up(rows as usize);
        }
        self.scroll_buffer = Some(buffer);
    }

    pub fn exit_scroll_buffer(&mut self) {
        self.scroll_buffer = None;
    }
}

pub struct Split {
    pub kind: SplitKind,
    pub children: Vec<Node>,
    pub weights: Vec<usize>,
}

impl Split {
    pub fn new(kind: SplitKind) -> Split {
        Split { kind, children: Vec::new(), weights: Vec::new() }
    }

    fn with_children(kind: SplitKind, children: Vec<Node>) -> Split {
        let weights = vec![1; children.len()];
        Split { kind, children, weights }
    }
}

pub enum Node {
    Leaf(Pane),
    Split(Split),
}

fn contains_pane(node: &Node, pane_id: usize) -> bool {
    match node {
        Node::Leaf(pane) => pane.pane_id == pane_id,
        Node::Split(split) => split.children.iter().any(|c| contains_pane(c, pane_id)),
    }
}

fn collect_pane_ids(node: &Node, out: &mut Vec<usize>) {
    match node {
        Node::Leaf(pane) => out.push(pane.pane_id),
        Node::Split(split) => {
            for child in &split.children {
                collect_pane_ids(child, out);
            }
        }
    }
}

fn find_pane<'a>(node: &'a Node, pane_id: usize) -> Option<&'a Pane> {
    match node {
        Node::Leaf(pane) => (pane.pane_id == pane_id).then_some(pane),
        Node::Split(split) => split.children.iter().find_map(|c| find_pane(c, pane_id)),
    }
}

fn find_pane_mut<'a>(node: &'a mut Node, pane_id: usize) -> Option<&'a mut Pane> {
    match node {
        Node::Leaf(pane) => (pane.pane_id == pane_id).then_some(pane),
        Node::Split(split) => split.children.iter_mut().find_map(|c| find_pane_mut(c, pane_id)),
    }
}

/// The split that directly contains the given pane.
fn parent_split_of<'a>(node: &'a mut Node, pane_id: usize) -> Option<&'a mut Split> {
    let Node::Split(split) = node else { return None };
    let direct = split
        .children
        .iter()
        .any(|c| matches!(c, Node::Leaf(p) if p.pane_id == pane_id));
    if direct {
        return Some(split);
    }
    for child in split.children.iter_mut() {
        if contains_pane(child, pane_id) {
            return parent_split_of(child, pane_id);
        }
    }
    None
}

/// Remove the leaf holding this pane from the tree.
fn take_leaf(node: &mut Node, pane_id: usize) -> Option<Pane> {
    let Node::Split(split) = node else { return None };
    let direct = split
        .children
        .iter()
        .position(|c| matches!(c, Node::Leaf(p) if p.pane_id == pane_id));
    if let Some(index) = direct {
        split.weights.remove(index);
        match split.children.remove(index) {
            Node::Leaf(pane) => return Some(pane),
            Node::Split(_) => return None,
        }
    }
    for child in split.children.iter_mut() {
        if contains_pane(child, pane_id) {
            return take_leaf(child, pane_id);
        }
    }
    None
}

/// Restore the tree invariants after a removal: splits of length 0 are
/// deleted, splits of length 1 collapse into their parent's slot (the slot
/// weight is kept).
fn collapse(node: &mut Node) {
    let Node::Split(split) = node else { return };

    for child in split.children.iter_mut() {
        collapse(child);
    }

    let mut i = 0;
    while i < split.children.len() {
        if matches!(&split.children[i], Node::Split(s) if s.children.is_empty()) {
            split.children.remove(i);
            split.weights.remove(i);
        } else {
            i += 1;
        }
    }

    for i in 0..split.children.len() {
        loop {
            let lifted = match &mut split.children[i] {
                Node::Split(inner) if inner.children.len() == 1 => inner.children.pop(),
                _ => None,
            };
            match lifted {
                Some(child) => split.children[i] = child,
                None => break,
            }
        }
    }
}

/// Take every pane out of the tree in DFS order, leaving empty-split
/// markers behind. Paired with `refill_leaves`.
fn extract_leaves(node: &mut Node, out: &mut Vec<Pane>) {
    if let Node::Split(split) = node {
        for child in split.children.iter_mut() {
            if matches!(child, Node::Leaf(_)) {
                let marker = Node::Split(Split::new(SplitKind::Horizontal));
                if let Node::Leaf(pane) = std::mem::replace(child, marker) {
                    out.push(pane);
                }
            } else {
                extract_leaves(child, out);
            }
        }
    }
}

fn refill_leaves(node: &mut Node, panes: &mut std::vec::IntoIter<Pane>) {
    if let Node::Split(split) = node {
        for child in split.children.iter_mut() {
            if matches!(child, Node::Split(s) if s.children.is_empty()) {
                if let Some(pane) = panes.next() {
                    *child = Node::Leaf(pane);
                }
            } else {
                refill_leaves(child, panes);
            }
        }
    }
}

fn split_at_path<'a>(node: &'a Node, path: &[usize]) -> Option<&'a Split> {
    let mut current = node;
    for &index in path {
        match current {
            Node::Split(split) => current = split.children.get(index)?,
            Node::Leaf(_) => return None,
        }
    }
    match current {
        Node::Split(split) => Some(split),
        Node::Leaf(_) => None,
    }
}

fn split_at_path_mut<'a>(node: &'a mut Node, path: &[usize]) -> Option<&'a mut Split> {
    let mut current = node;
    for &index in path {
        match current {
            Node::Split(split) => current = split.children.get_mut(index)?,
            Node::Leaf(_) => return None,
        }
    }
    match current {
        Node::Split(split) => Some(split),
        Node::Leaf(_) => None,
    }
}

fn path_to_pane(node: &Node, pane_id: usize, path: &mut Vec<usize>) -> bool {
    match node {
        Node::Leaf(pane) => pane.pane_id == pane_id,
        Node::Split(split) => {
            for (i, child) in split.children.iter().enumerate() {
                path.push(i);
                if path_to_pane(child, pane_id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }
    }
}

pub struct Window {
    pub window_id: usize,
    pub index: usize,
    pub root: Node,
    active_pane_id: Option<usize>,
    prev_active_pane_id: Option<usize>,
    pub chosen_name: Option<String>,
    pub zoom: bool,
    pub synchronize_panes: bool,
    pub previous_selected_layout: Option<LayoutType>,
}

impl Window {
    pub fn new(index: usize) -> Window {
        let window_id = WINDOW_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Window {
            window_id,
            index,
            root: Node::Split(Split::new(SplitKind::Horizontal)),
            active_pane_id: None,
            prev_active_pane_id: None,
            chosen_name: None,
            zoom: false,
            synchronize_panes: false,
            previous_selected_layout: None,
        }
    }

    /// Name for the status bar: the chosen name, else the active pane's.
    pub fn name(&self) -> String {
        if let Some(name) = &self.chosen_name {
            return name.clone();
        }
        self.active_pane().map(|p| p.name()).unwrap_or_default()
    }

    pub fn pane_ids(&self) -> Vec<usize> {
        let mut out = Vec::new();
        collect_pane_ids(&self.root, &mut out);
        out
    }

    pub fn pane_count(&self) -> usize {
        self.pane_ids().len()
    }

    pub fn has_panes(&self) -> bool {
        self.pane_count() > 0
    }

    pub fn contains_pane(&self, pane_id: usize) -> bool {
        contains_pane(&self.root, pane_id)
    }

    pub fn pane(&self, pane_id: usize) -> Option<&Pane> {
        find_pane(&self.root, pane_id)
    }

    pub fn pane_mut(&mut self, pane_id: usize) -> Option<&mut Pane> {
        find_pane_mut(&mut self.root, pane_id)
    }

    pub fn active_pane_id(&self) -> Option<usize> {
        self.active_pane_id
    }

    pub fn active_pane(&self) -> Option<&Pane> {
        self.active_pane_id.and_then(|id| self.pane(id))
    }

    pub fn active_pane_mut(&mut self) -> Option<&mut Pane> {
        let id = self.active_pane_id?;
        self.pane_mut(id)
    }

    /// Focus a pane. Remembers the previously active pane and drops zoom.
    pub fn set_active_pane(&mut self, pane_id: usize) {
        if let Some(current) = self.active_pane_id {
            if current != pane_id {
                self.prev_active_pane_id = Some(current);
            }
        }
        self.zoom = false;
        self.active_pane_id = Some(pane_id);
    }

    /// The previously active pane, only while it still lives in this window.
    pub fn previous_active_pane_id(&self) -> Option<usize> {
        self.prev_active_pane_id.filter(|id| self.contains_pane(*id))
    }

    /// Index of a pane in DFS order, for `select-pane -t :N`.
    pub fn get_pane_index(&self, pane_id: usize) -> Option<usize> {
        self.pane_ids().iter().position(|id| *id == pane_id)
    }

    /// Add a pane next to the active one. With the same split direction the
    /// pane slides in right after the active one; otherwise the active pane
    /// is replaced by a new split of the two, inheriting its weight.
    pub fn add_pane(&mut self, pane: Pane, vsplit: bool) {
        let kind = if vsplit { SplitKind::Vertical } else { SplitKind::Horizontal };
        let pane_id = pane.pane_id;

        match self.active_pane_id {
            None => {
                if let Node::Split(root) = &mut self.root {
                    root.children.push(Node::Leaf(pane));
                    root.weights.push(1);
                }
            }
            Some(active) => match parent_split_of(&mut self.root, active) {
                None => {
                    if let Node::Split(root) = &mut self.root {
                        root.children.push(Node::Leaf(pane));
                        root.weights.push(1);
                    }
                }
                Some(parent) => {
                    let index = parent
                        .children
                        .iter()
                        .position(|c| matches!(c, Node::Leaf(p) if p.pane_id == active))
                        .unwrap_or(0);
                    if parent.kind == kind {
                        parent.children.insert(index + 1, Node::Leaf(pane));
                        parent.weights.insert(index + 1, 1);
                    } else {
                        let placeholder = Node::Split(Split::new(kind));
                        let old = std::mem::replace(&mut parent.children[index], placeholder);
                        if let Node::Split(new_split) = &mut parent.children[index] {
                            new_split.children.push(old);
                            new_split.children.push(Node::Leaf(pane));
                            new_split.weights = vec![1, 1];
                        }
                        // parent.weights[index] stays: the new split takes
                        // over the active pane's share.
                    }
                }
            },
        }

        self.set_active_pane(pane_id);
        self.zoom = false;
    }

    /// Remove a pane, refocusing and collapsing degenerate splits.
    pub fn remove_pane(&mut self, pane_id: usize) -> Option<Pane> {
        if !self.contains_pane(pane_id) {
            return None;
        }

        if self.active_pane_id == Some(pane_id) {
            match self.previous_active_pane_id() {
                Some(prev) if prev != pane_id => self.set_active_pane(prev),
                _ => self.focus_next(1),
            }
        }

        let pane = take_leaf(&mut self.root, pane_id);
        collapse(&mut self.root);

        let remaining = self.pane_ids();
        if let Some(active) = self.active_pane_id {
            if !remaining.contains(&active) {
                self.active_pane_id = remaining.first().copied();
            }
        }
        if let Some(prev) = self.prev_active_pane_id {
            if !remaining.contains(&prev) {
                self.prev_active_pane_id = None;
            }
        }

        pane
    }

    /// Cyclic focus movement over the panes in tree order.
    pub fn focus_next(&mut self, count: isize) {
        let ids = self.pane_ids();
        if ids.is_empty() {
            self.active_pane_id = None;
            return;
        }
        let current = self
            .active_pane_id
            .and_then(|id| ids.iter().position(|p| *p == id))
            .unwrap_or(0);
        let len = ids.len() as isize;
        let next = (current as isize + count).rem_euclid(len) as usize;
        self.set_active_pane(ids[next]);
    }

    pub fn focus_previous(&mut self) {
        self.focus_next(-1);
    }

    /// Rotate panes through the leaf slots, keeping each slot's weight.
    /// With `with_pane_before_only` / `with_pane_after_only`, only the pair
    /// around the active pane takes part.
    pub fn rotate(&mut self, count: isize, with_pane_before_only: bool, with_pane_after_only: bool) {
        let mut panes: Vec<Pane> = Vec::new();
        extract_leaves(&mut self.root, &mut panes);

        let len = panes.len();
        if len > 1 {
            let active_index = self
                .active_pane_id
                .and_then(|id| panes.iter().position(|p| p.pane_id == id));

            let (start, span) = match active_index {
                Some(i) if with_pane_before_only => {
                    if i > 0 {
                        (i - 1, 2)
                    } else {
                        (0, 0)
                    }
                }
                Some(i) if with_pane_after_only => {
                    if i + 1 < len {
                        (i, 2)
                    } else {
                        (0, 0)
                    }
                }
                _ => (0, len),
            };

            if span > 1 {
                let section = &mut panes[start..start + span];
                let shift = count.rem_euclid(span as isize) as usize;
                // Slot j receives the pane of slot (j + count) % span.
                section.rotate_left(shift);
            }
        }

        refill_leaves(&mut self.root, &mut panes.into_iter());
    }

    /// Apply one of the predefined layout templates. A single-pane window
    /// always normalizes to even-horizontal.
    pub fn select_layout(&mut self, layout: LayoutType) {
        let active = self.active_pane_id;
        let mut panes: Vec<Pane> = Vec::new();
        drain_panes(&mut self.root, &mut panes);

        let layout = if panes.len() <= 1 { LayoutType::EvenHorizontal } else { layout };

        self.root = match layout {
            LayoutType::EvenHorizontal => Node::Split(Split::with_children(
                SplitKind::Horizontal,
                panes.into_iter().map(Node::Leaf).collect(),
            )),
            LayoutType::EvenVertical => Node::Split(Split::with_children(
                SplitKind::Vertical,
                panes.into_iter().map(Node::Leaf).collect(),
            )),
            LayoutType::MainHorizontal | LayoutType::MainVertical => {
                let main_index = active
                    .and_then(|id| panes.iter().position(|p| p.pane_id == id))
                    .unwrap_or(0);
                let main = panes.remove(main_index);
                let rest: Vec<Node> = panes.into_iter().map(Node::Leaf).collect();
                let (outer, inner) = if layout == LayoutType::MainHorizontal {
                    (SplitKind::Horizontal, SplitKind::Vertical)
                } else {
                    (SplitKind::Vertical, SplitKind::Horizontal)
                };
                Node::Split(Split::with_children(
                    outer,
                    vec![Node::Leaf(main), Node::Split(Split::with_children(inner, rest))],
                ))
            }
            LayoutType::Tiled => {
                let column_count = (panes.len() as f64).sqrt().ceil() as usize;
                let mut rows: Vec<Node> = Vec::new();
                let mut current_row: Vec<Node> = Vec::new();
                for pane in panes {
                    current_row.push(Node::Leaf(pane));
                    if current_row.len() >= column_count {
                        rows.push(Node::Split(Split::with_children(
                            SplitKind::Vertical,
                            std::mem::take(&mut current_row),
                        )));
                    }
                }
                if !current_row.is_empty() {
                    rows.push(Node::Split(Split::with_children(SplitKind::Vertical, current_row)));
                }
                Node::Split(Split::with_children(SplitKind::Horizontal, rows))
            }
        };

        collapse(&mut self.root);
        self.previous_selected_layout = Some(layout);
    }

    /// Cycle through the layout templates. With exactly two panes only the
    /// even layouts are toggled.
    pub fn select_next_layout(&mut self, count: isize) {
        let all: Vec<LayoutType> = if self.pane_count() == 2 {
            vec![LayoutType::EvenHorizontal, LayoutType::EvenVertical]
        } else {
            LayoutType::ALL.to_vec()
        };

        let current = self.previous_selected_layout.unwrap_or(LayoutType::Tiled);
        let index = all.iter().position(|l| *l == current).unwrap_or(0);
        let next = all[(index as isize + count).rem_euclid(all.len() as isize) as usize];
        self.select_layout(next);
    }

    pub fn select_previous_layout(&mut self) {
        self.select_next_layout(-1);
    }

    pub fn change_size_for_active_pane(&mut self, up: i32, right: i32, down: i32, left: i32) {
        self.handle_side(SplitKind::Vertical, true, left, false);
        self.handle_side(SplitKind::Vertical, false, right, false);
        self.handle_side(SplitKind::Horizontal, true, up, false);
        self.handle_side(SplitKind::Horizontal, false, down, false);
    }

    /// Grow the active pane towards one side by moving weight between it and
    /// the neighbour in the nearest ancestor split of the right orientation.
    /// Against the outer edge, the opposite border moves instead. The amount
    /// actually moved is clamped so the donor keeps weight >= 1, which keeps
    /// the split's total weight constant.
    fn handle_side(&mut self, kind: SplitKind, is_before: bool, amount: i32, trying_other_side: bool) {
        if amount == 0 {
            return;
        }
        let Some(active) = self.active_pane_id else { return };
        let mut path = Vec::new();
        if !path_to_pane(&self.root, active, &mut path) {
            return;
        }

        let mut found: Option<(Vec<usize>, usize)> = None;
        for depth in (0..path.len()).rev() {
            let split_path = &path[..depth];
            let child_index = path[depth];
            let Some(split) = split_at_path(&self.root, split_path) else { continue };
            let has_neighbour = if is_before {
                child_index > 0
            } else {
                child_index + 1 < split.children.len()
            };
            if split.kind == kind && has_neighbour {
                found = Some((split_path.to_vec(), child_index));
                break;
            }
        }

        match found {
            Some((split_path, child_index)) => {
                let Some(split) = split_at_path_mut(&mut self.root, &split_path) else { return };
                let neighbour = if is_before { child_index - 1 } else { child_index + 1 };
                let transfer: i64 = if amount > 0 {
                    (amount as i64).min(split.weights[neighbour] as i64 - 1)
                } else {
                    -((-amount as i64).min(split.weights[child_index] as i64 - 1))
                };
                split.weights[child_index] =
                    ((split.weights[child_index] as i64) + transfer).max(1) as usize;
                split.weights[neighbour] =
                    ((split.weights[neighbour] as i64) - transfer).max(1) as usize;
            }
            None => {
                if !trying_other_side {
                    self.handle_side(kind, !is_before, -amount, true);
                }
            }
        }
    }

    /// Deterministic structural hash, consumed by renderers to decide when
    /// a cached layout must be rebuilt.
    pub fn invalidation_hash(&self) -> String {
        fn hash_node(node: &Node) -> String {
            match node {
                Node::Leaf(pane) => format!("p{}", pane.pane_id),
                Node::Split(split) => {
                    let children: Vec<String> = split.children.iter().map(hash_node).collect();
                    let tag = match split.kind {
                        SplitKind::Horizontal => "HSplit",
                        SplitKind::Vertical => "VSplit",
                    };
                    format!("{}({})", tag, children.join(","))
                }
            }
        }
        format!(
            "<window_id={},zoom={},children={}>",
            self.window_id,
            self.zoom,
            hash_node(&self.root)
        )
    }
}

fn drain_panes(node: &mut Node, out: &mut Vec<Pane>) {
    let mut collected = Vec::new();
    extract_leaves(node, &mut collected);
    out.append(&mut collected);
    *node = Node::Split(Split::new(SplitKind::Horizontal));
}

/// All windows plus per-client focus bookkeeping.
pub struct Arrangement {
    pub windows: Vec<Window>,
    pub base_index: usize,
    active_window_for_client: HashMap<ClientId, usize>,
    prev_active_window_for_client: HashMap<ClientId, usize>,
    /// Active window of the last client activity; new clients start here.
    last_active_window_id: Option<usize>,
}

impl Default for Arrangement {
    fn default() -> Self {
        Arrangement::new()
    }
}

impl Arrangement {
    pub fn new() -> Arrangement {
        Arrangement {
            windows: Vec::new(),
            base_index: 0,
            active_window_for_client: HashMap::new(),
            prev_active_window_for_client: HashMap::new(),
            last_active_window_id: None,
        }
    }

    pub fn window_by_id(&self, window_id: usize) -> Option<&Window> {
        self.windows.iter().find(|w| w.window_id == window_id)
    }

    pub fn window_by_id_mut(&mut self, window_id: usize) -> Option<&mut Window> {
        self.windows.iter_mut().find(|w| w.window_id == window_id)
    }

    pub fn get_window_by_index(&self, index: usize) -> Option<&Window> {
        self.windows.iter().find(|w| w.index == index)
    }

    /// The active window id for this client, bootstrapping new clients onto
    /// the process-wide last active window.
    pub fn active_window_id(&mut self, client: ClientId) -> Option<usize> {
        if let Some(id) = self.active_window_for_client.get(&client).copied() {
            if self.window_by_id(id).is_some() {
                return Some(id);
            }
        }
        let fallback = self
            .last_active_window_id
            .filter(|id| self.window_by_id(*id).is_some())
            .or_else(|| self.windows.first().map(|w| w.window_id))?;
        self.active_window_for_client.insert(client, fallback);
        Some(fallback)
    }

    pub fn get_active_window(&mut self, client: ClientId) -> Option<&mut Window> {
        let id = self.active_window_id(client)?;
        self.window_by_id_mut(id)
    }

    pub fn set_active_window(&mut self, client: ClientId, window_id: usize) {
        if let Some(previous) = self.active_window_for_client.get(&client).copied() {
            self.prev_active_window_for_client.insert(client, previous);
        }
        self.active_window_for_client.insert(client, window_id);
        self.last_active_window_id = Some(window_id);
    }

    pub fn set_active_window_from_pane_id(&mut self, client: ClientId, pane_id: usize) {
        if let Some(window_id) = self.window_id_for_pane(pane_id) {
            self.set_active_window(client, window_id);
        }
    }

    pub fn get_previous_active_window_id(&self, client: ClientId) -> Option<usize> {
        self.prev_active_window_for_client
            .get(&client)
            .copied()
            .filter(|id| self.window_by_id(*id).is_some())
    }

    pub fn window_id_for_pane(&self, pane_id: usize) -> Option<usize> {
        self.windows
            .iter()
            .find(|w| w.contains_pane(pane_id))
            .map(|w| w.window_id)
    }

    pub fn pane(&self, pane_id: usize) -> Option<&Pane> {
        self.windows.iter().find_map(|w| w.pane(pane_id))
    }

    pub fn pane_mut(&mut self, pane_id: usize) -> Option<&mut Pane> {
        self.windows.iter_mut().find_map(|w| w.pane_mut(pane_id))
    }

    pub fn get_active_pane_id(&mut self, client: ClientId) -> Option<usize> {
        self.get_active_window(client).and_then(|w| w.active_pane_id())
    }

    /// Create a window holding just this pane, at the first free index at or
    /// above `base_index`. Returns the new window id.
    pub fn create_window(
        &mut self,
        client: Option<ClientId>,
        pane: Pane,
        name: Option<String>,
        set_active: bool,
    ) -> usize {
        let taken: Vec<usize> = self.windows.iter().map(|w| w.index).collect();
        let mut index = self.base_index;
        while taken.contains(&index) {
            index += 1;
        }

        let mut window = Window::new(index);
        window.add_pane(pane, false);
        window.chosen_name = name;
        let window_id = window.window_id;

        self.windows.push(window);
        self.windows.sort_by_key(|w| w.index);

        if set_active {
            match client {
                Some(client) => self.set_active_window(client, window_id),
                None => self.last_active_window_id = Some(window_id),
            }
        }
        window_id
    }

    /// Move a window to a new index and keep the list sorted. The caller
    /// checks the index is free.
    pub fn move_window(&mut self, window_id: usize, new_index: usize) {
        if let Some(window) = self.window_by_id_mut(window_id) {
            window.index = new_index;
        }
        self.windows.sort_by_key(|w| w.index);
    }

    /// Remove a pane from whichever window holds it. A window losing its
    /// last pane is removed; clients watching it move to the next window.
    pub fn remove_pane(&mut self, pane_id: usize) -> Option<Pane> {
        let window_id = self.window_id_for_pane(pane_id)?;
        let pane = self.window_by_id_mut(window_id)?.remove_pane(pane_id);

        let empty = self
            .window_by_id(window_id)
            .map(|w| !w.has_panes())
            .unwrap_or(false);
        if empty {
            let watchers: Vec<ClientId> = self
                .active_window_for_client
                .iter()
                .filter(|(_, w)| **w == window_id)
                .map(|(c, _)| *c)
                .collect();
            for client in watchers {
                self.focus_next_window(client);
            }
            self.windows.retain(|w| w.window_id != window_id);
            self.active_window_for_client.retain(|_, w| *w != window_id);
            self.prev_active_window_for_client.retain(|_, w| *w != window_id);
            if self.last_active_window_id == Some(window_id) {
                self.last_active_window_id = self.windows.first().map(|w| w.window_id);
            }
        }

        pane
    }

    pub fn focus_next_window(&mut self, client: ClientId) {
        self.cycle_window(client, 1);
    }

    pub fn focus_previous_window(&mut self, client: ClientId) {
        self.cycle_window(client, -1);
    }

    fn cycle_window(&mut self, client: ClientId, direction: isize) {
        let Some(current) = self.active_window_id(client) else { return };
        let Some(position) = self.windows.iter().position(|w| w.window_id == current) else {
            return;
        };
        let len = self.windows.len() as isize;
        let next = (position as isize + direction).rem_euclid(len) as usize;
        let next_id = self.windows[next].window_id;
        self.set_active_window(client, next_id);
    }

    /// Move the active pane of a multi-pane window into a window of its own.
    pub fn break_pane(&mut self, client: ClientId, set_active: bool) -> Option<usize> {
        let window = self.get_active_window(client)?;
        if window.pane_count() <= 1 {
            return None;
        }
        let pane_id = window.active_pane_id()?;
        let pane = window.remove_pane(pane_id)?;
        Some(self.create_window(Some(client), pane, None, set_active))
    }

    pub fn rotate_window(&mut self, client: ClientId, count: isize) {
        if let Some(window) = self.get_active_window(client) {
            window.rotate(count, false, false);
        }
    }

    pub fn has_panes(&self) -> bool {
        self.windows.iter().any(|w| w.has_panes())
    }

    pub fn invalidation_hash(&mut self, client: ClientId) -> String {
        match self.get_active_window(client) {
            Some(window) => window.invalidation_hash(),
            None => "<no-windows>".to_string(),
        }
    }

    /// A pane has priority when it is the focused pane of at least one
    /// client. With no clients attached nothing is deprioritized.
    pub fn pane_has_priority(&self, pane_id: usize) -> bool {
        if self.active_window_for_client.is_empty() {
            return true;
        }
        self.active_window_for_client.values().any(|window_id| {
            self.window_by_id(*window_id)
                .and_then(|w| w.active_pane_id())
                == Some(pane_id)
        })
    }

    pub fn clients(&self) -> Vec<ClientId> {
        self.active_window_for_client.keys().copied().collect()
    }

    pub fn clients_watching(&self, window_id: usize) -> Vec<ClientId> {
        self.active_window_for_client
            .iter()
            .filter(|(_, w)| **w == window_id)
            .map(|(c, _)| *c)
            .collect()
    }

    /// Drop a disconnected client's focus entries.
    pub fn remove_client(&mut self, client: ClientId) {
        self.active_window_for_client.remove(&client);
        self.prev_active_window_for_client.remove(&client);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn test_pane() -> Pane {
        Pane::new(Process::open_for_tests())
    }

    pub fn test_window() -> Window {
        Window::new(0)
    }

    fn check_invariants(window: &Window) {
        fn walk(node: &Node, is_root: bool) {
            if let Node::Split(split) = node {
                assert_eq!(split.children.len(), split.weights.len());
                assert!(split.weights.iter().all(|w| *w >= 1));
                if !is_root {
                    assert!(split.children.len() >= 2, "non-root split of length < 2");
                }
                for child in &split.children {
                    walk(child, false);
                }
            }
        }
        walk(&window.root, true);

        if let Some(active) = window.active_pane_id() {
            assert!(window.contains_pane(active), "active pane not reachable from root");
        }
        // Every pane appears exactly once.
        let mut ids = window.pane_ids();
        let len = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), len);
    }

    #[test]
    fn add_pane_same_direction_inserts_after_active() {
        let mut window = test_window();
        let a = test_pane();
        let b = test_pane();
        let c = test_pane();
        let (ia, ib, ic) = (a.pane_id, b.pane_id, c.pane_id);

        window.add_pane(a, false);
        window.add_pane(b, false);
        window.set_active_pane(ia);
        window.add_pane(c, false);

        assert_eq!(window.pane_ids(), vec![ia, ic, ib]);
        assert_eq!(window.active_pane_id(), Some(ic));
        check_invariants(&window);
    }

    #[test]
    fn add_pane_other_direction_nests_a_split() {
        let mut window = test_window();
        let a = test_pane();
        let b = test_pane();
        let (ia, ib) = (a.pane_id, b.pane_id);

        window.add_pane(a, false);
        window.add_pane(b, true);

        // Root stays horizontal; the two panes live in a nested vertical
        // split that inherited pane a's slot.
        let Node::Split(root) = &window.root else { panic!() };
        assert_eq!(root.kind, SplitKind::Horizontal);
        assert_eq!(root.children.len(), 1);
        let Node::Split(inner) = &root.children[0] else { panic!("expected nested split") };
        assert_eq!(inner.kind, SplitKind::Vertical);
        assert_eq!(window.pane_ids(), vec![ia, ib]);
        check_invariants(&window);
    }

    #[test]
    fn remove_pane_collapses_singleton_splits() {
        let mut window = test_window();
        let a = test_pane();
        let b = test_pane();
        let c = test_pane();
        let (ia, ib, ic) = (a.pane_id, b.pane_id, c.pane_id);

        window.add_pane(a, false);
        window.add_pane(b, true);
        window.add_pane(c, true);
        check_invariants(&window);

        let removed = window.remove_pane(ib).unwrap();
        assert_eq!(removed.pane_id, ib);
        check_invariants(&window);

        window.remove_pane(ic);
        check_invariants(&window);
        assert_eq!(window.pane_ids(), vec![ia]);
        assert_eq!(window.active_pane_id(), Some(ia));

        window.remove_pane(ia);
        check_invariants(&window);
        assert!(!window.has_panes());
        assert_eq!(window.active_pane_id(), None);
    }

    #[test]
    fn remove_active_pane_prefers_previous_active() {
        let mut window = test_window();
        let a = test_pane();
        let b = test_pane();
        let c = test_pane();
        let (ia, ib, ic) = (a.pane_id, b.pane_id, c.pane_id);

        window.add_pane(a, false);
        window.add_pane(b, false);
        window.add_pane(c, false);
        window.set_active_pane(ib);
        window.set_active_pane(ic);

        window.remove_pane(ic);
        assert_eq!(window.active_pane_id(), Some(ib));
        let _ = ia;
        check_invariants(&window);
    }

    #[test]
    fn random_add_remove_keeps_invariants() {
        let mut window = test_window();
        let mut ids = Vec::new();
        // A fixed pseudo-random walk over add/remove.
        let mut seed: u64 = 0x12345678;
        for step in 0..60 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let choice = seed >> 33;
            if ids.len() < 2 || choice % 3 != 0 {
                let pane = test_pane();
                ids.push(pane.pane_id);
                window.add_pane(pane, choice % 2 == 0);
            } else {
                let victim = ids.remove((choice as usize) % ids.len());
                window.remove_pane(victim);
            }
            check_invariants(&window);
            assert_eq!(window.pane_count(), ids.len(), "step {}", step);
        }
    }

    #[test]
    fn focus_next_and_previous_cycle() {
        let mut window = test_window();
        let panes: Vec<usize> = (0..3)
            .map(|_| {
                let p = test_pane();
                let id = p.pane_id;
                window.add_pane(p, false);
                id
            })
            .collect();

        window.set_active_pane(panes[0]);
        window.focus_next(1);
        assert_eq!(window.active_pane_id(), Some(panes[1]));
        window.focus_next(1);
        assert_eq!(window.active_pane_id(), Some(panes[2]));
        window.focus_next(1);
        assert_eq!(window.active_pane_id(), Some(panes[0]));
        window.focus_previous();
        assert_eq!(window.active_pane_id(), Some(panes[2]));
    }

    #[test]
    fn rotate_preserves_slot_weights() {
        let mut window = test_window();
        let panes: Vec<usize> = (0..3)
            .map(|_| {
                let p = test_pane();
                let id = p.pane_id;
                window.add_pane(p, false);
                id
            })
            .collect();

        // Skew the weights.
        if let Node::Split(root) = &mut window.root {
            root.weights = vec![3, 2, 1];
        }

        window.rotate(1, false, false);
        let Node::Split(root) = &window.root else { panic!() };
        assert_eq!(root.weights, vec![3, 2, 1]);
        assert_eq!(window.pane_ids(), vec![panes[1], panes[2], panes[0]]);
        check_invariants(&window);
    }

    #[test]
    fn rotate_with_neighbour_only_swaps_pair() {
        let mut window = test_window();
        let panes: Vec<usize> = (0..3)
            .map(|_| {
                let p = test_pane();
                let id = p.pane_id;
                window.add_pane(p, false);
                id
            })
            .collect();

        window.set_active_pane(panes[1]);
        window.rotate(1, true, false);
        assert_eq!(window.pane_ids(), vec![panes[1], panes[0], panes[2]]);

        window.set_active_pane(panes[0]);
        window.rotate(1, false, true);
        assert_eq!(window.pane_ids(), vec![panes[1], panes[2], panes[0]]);
    }

    #[test]
    fn change_size_preserves_total_weight() {
        let mut window = test_window();
        window.add_pane(test_pane(), false);
        window.add_pane(test_pane(), true);
        window.add_pane(test_pane(), true);

        fn weight_sums(node: &Node, out: &mut Vec<usize>) {
            if let Node::Split(split) = node {
                out.push(split.weights.iter().sum());
                for child in &split.children {
                    weight_sums(child, out);
                }
            }
        }

        for (up, right, down, left) in [(0, 2, 0, 0), (0, 0, 0, 3), (1, 0, 0, 0), (0, 0, 2, 0)] {
            let mut before = Vec::new();
            weight_sums(&window.root, &mut before);
            window.change_size_for_active_pane(up, right, down, left);
            let mut after = Vec::new();
            weight_sums(&window.root, &mut after);
            assert_eq!(before, after, "total weight per split must be preserved");
            fn check_min(node: &Node) {
                if let Node::Split(split) = node {
                    assert!(split.weights.iter().all(|w| *w >= 1));
                    for child in &split.children {
                        check_min(child);
                    }
                }
            }
            check_min(&window.root);
        }
    }

    #[test]
    fn change_size_moves_weight_between_neighbours() {
        let mut window = test_window();
        window.add_pane(test_pane(), false);
        window.add_pane(test_pane(), true);
        // Active is the right pane; give both more room to shrink into.
        {
            let Node::Split(root) = &mut window.root else { panic!() };
            let Node::Split(inner) = &mut root.children[0] else { panic!() };
            inner.weights = vec![5, 5];
        }

        window.change_size_for_active_pane(0, 0, 0, 2);
        let Node::Split(root) = &window.root else { panic!() };
        let Node::Split(inner) = &root.children[0] else { panic!() };
        assert_eq!(inner.weights, vec![3, 7]);
        assert_eq!(inner.weights.iter().sum::<usize>(), 10);
    }

    #[test]
    fn change_size_at_edge_retries_other_side() {
        let mut window = test_window();
        let a = test_pane();
        let ia = a.pane_id;
        window.add_pane(a, false);
        window.add_pane(test_pane(), true);
        {
            let Node::Split(root) = &mut window.root else { panic!() };
            let Node::Split(inner) = &mut root.children[0] else { panic!() };
            inner.weights = vec![5, 5];
        }

        // The left pane grown further left: its right border moves instead.
        window.set_active_pane(ia);
        window.change_size_for_active_pane(0, 0, 0, 2);
        let Node::Split(root) = &window.root else { panic!() };
        let Node::Split(inner) = &root.children[0] else { panic!() };
        assert_eq!(inner.weights, vec![3, 7]);
    }

    #[test]
    fn layouts() {
        let mut window = test_window();
        let panes: Vec<usize> = (0..5)
            .map(|_| {
                let p = test_pane();
                let id = p.pane_id;
                window.add_pane(p, false);
                id
            })
            .collect();
        window.set_active_pane(panes[2]);

        window.select_layout(LayoutType::EvenVertical);
        let Node::Split(root) = &window.root else { panic!() };
        assert_eq!(root.kind, SplitKind::Vertical);
        assert_eq!(root.children.len(), 5);
        check_invariants(&window);

        window.select_layout(LayoutType::MainHorizontal);
        let Node::Split(root) = &window.root else { panic!() };
        assert_eq!(root.kind, SplitKind::Horizontal);
        assert_eq!(root.children.len(), 2);
        match &root.children[0] {
            Node::Leaf(p) => assert_eq!(p.pane_id, panes[2]),
            _ => panic!("main pane should lead"),
        }
        check_invariants(&window);

        // Tiled: ceil(sqrt(5)) = 3 columns, rows of 3 and 2.
        window.select_layout(LayoutType::Tiled);
        let Node::Split(root) = &window.root else { panic!() };
        assert_eq!(root.kind, SplitKind::Horizontal);
        assert_eq!(root.children.len(), 2);
        match (&root.children[0], &root.children[1]) {
            (Node::Split(r0), Node::Split(r1)) => {
                assert_eq!(r0.children.len(), 3);
                assert_eq!(r1.children.len(), 2);
            }
            _ => panic!("tiled rows should be splits"),
        }
        check_invariants(&window);
        assert_eq!(window.previous_selected_layout, Some(LayoutType::Tiled));
    }

    #[test]
    fn single_pane_layout_normalizes() {
        let mut window = test_window();
        window.add_pane(test_pane(), false);
        window.select_layout(LayoutType::Tiled);
        assert_eq!(window.previous_selected_layout, Some(LayoutType::EvenHorizontal));
        check_invariants(&window);
    }

    #[test]
    fn invalidation_hash_tracks_structure() {
        let mut window = test_window();
        window.add_pane(test_pane(), false);
        let h1 = window.invalidation_hash();
        window.add_pane(test_pane(), true);
        let h2 = window.invalidation_hash();
        assert_ne!(h1, h2);
        window.zoom = true;
        let h3 = window.invalidation_hash();
        assert_ne!(h2, h3);
        assert!(h3.contains("VSplit"));
    }

    #[test]
    fn arrangement_window_lifecycle() {
        let mut arrangement = Arrangement::new();
        let client: ClientId = 1;

        let w1 = arrangement.create_window(Some(client), test_pane(), Some("one".into()), true);
        let w2 = arrangement.create_window(Some(client), test_pane(), None, true);

        assert_eq!(arrangement.windows.len(), 2);
        assert_eq!(arrangement.windows[0].index, 0);
        assert_eq!(arrangement.windows[1].index, 1);
        assert_eq!(arrangement.active_window_id(client), Some(w2));
        assert_eq!(arrangement.get_previous_active_window_id(client), Some(w1));

        // Removing the last pane of w2 moves the client to w1.
        let pane_id = arrangement.get_active_pane_id(client).unwrap();
        arrangement.remove_pane(pane_id);
        assert_eq!(arrangement.windows.len(), 1);
        assert_eq!(arrangement.active_window_id(client), Some(w1));
    }

    #[test]
    fn base_index_and_free_slot_allocation() {
        let mut arrangement = Arrangement::new();
        arrangement.base_index = 1;
        arrangement.create_window(None, test_pane(), None, true);
        arrangement.create_window(None, test_pane(), None, true);
        assert_eq!(arrangement.windows[0].index, 1);
        assert_eq!(arrangement.windows[1].index, 2);

        // Free up index 1, the next window reclaims it.
        let first = arrangement.windows[0].active_pane_id().unwrap();
        arrangement.remove_pane(first);
        arrangement.create_window(None, test_pane(), None, true);
        assert_eq!(arrangement.windows.iter().map(|w| w.index).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn move_window_resorts() {
        let mut arrangement = Arrangement::new();
        let w1 = arrangement.create_window(None, test_pane(), None, true);
        let _w2 = arrangement.create_window(None, test_pane(), None, true);
        arrangement.move_window(w1, 9);
        assert_eq!(arrangement.windows[1].window_id, w1);
        assert_eq!(arrangement.windows[1].index, 9);
    }

    #[test]
    fn break_pane_creates_new_window() {
        let mut arrangement = Arrangement::new();
        let client: ClientId = 7;
        arrangement.create_window(Some(client), test_pane(), None, true);
        {
            let window = arrangement.get_active_window(client).unwrap();
            window.add_pane(test_pane(), true);
        }
        let active_pane = arrangement.get_active_pane_id(client).unwrap();

        let new_window = arrangement.break_pane(client, true).unwrap();
        assert_eq!(arrangement.windows.len(), 2);
        assert_eq!(arrangement.active_window_id(client), Some(new_window));
        let window = arrangement.window_by_id(new_window).unwrap();
        assert_eq!(window.pane_ids(), vec![active_pane]);

        // A single-pane window refuses to break.
        assert!(arrangement.break_pane(client, true).is_none());
    }

    #[test]
    fn new_client_bootstraps_to_last_active_window() {
        let mut arrangement = Arrangement::new();
        let first: ClientId = 1;
        let _w1 = arrangement.create_window(Some(first), test_pane(), None, true);
        let w2 = arrangement.create_window(Some(first), test_pane(), None, true);

        let second: ClientId = 2;
        assert_eq!(arrangement.active_window_id(second), Some(w2));
    }

    #[test]
    fn pane_priority_follows_focus() {
        let mut arrangement = Arrangement::new();
        let client: ClientId = 1;
        arrangement.create_window(Some(client), test_pane(), None, true);
        let focused = arrangement.get_active_pane_id(client).unwrap();
        let other = {
            let window = arrangement.get_active_window(client).unwrap();
            let pane = test_pane();
            let id = pane.pane_id;
            window.add_pane(pane, true);
            window.set_active_pane(focused);
            id
        };

        assert!(arrangement.pane_has_priority(focused));
        assert!(!arrangement.pane_has_priority(other));

        arrangement.remove_client(client);
        // No clients: nothing is deprioritized.
        assert!(arrangement.pane_has_priority(other));
    }
}
