//! View framework: batched updates, dirty tracking, and a character + attribute buffer.
//!
//! A [`DebugView`] pairs the shared [`ViewCore`] (geometry, cursor, buffer, update nesting)
//! with a [`ViewBehavior`] that knows how to fill the buffer. Every setter brackets its change
//! in [`DebugView::begin_update`] / [`DebugView::end_update`]; the buffer is recomputed once,
//! when the outermost bracket closes. Handing the result to the presentation layer is a
//! separate step, [`DebugView::flush_updates`].

use std::collections::BTreeMap;
use std::fmt;

use crate::api::DebugConfig;
use crate::context::DebugContext;
use crate::error::DebugError;

pub mod disasm;
pub mod memory;
mod source;

pub use disasm::{DisassemblyView, RightColumn};
pub use memory::{MemoryCursor, MemoryTarget, MemoryView};
pub use source::ViewSource;

/// Plain text.
pub const ATTR_NORMAL: u8 = 0x00;
/// Value changed or a breakpoint is set here.
pub const ATTR_CHANGED: u8 = 0x01;
/// Cursor row or cell.
pub const ATTR_SELECTED: u8 = 0x02;
/// Invalid data.
pub const ATTR_INVALID: u8 = 0x04;
/// Past the end of the content.
pub const ATTR_DISABLED: u8 = 0x08;
/// Secondary columns.
pub const ATTR_ANCILLARY: u8 = 0x10;
/// Row of the live program counter.
pub const ATTR_CURRENT: u8 = 0x20;
/// Comment text.
pub const ATTR_COMMENT: u8 = 0x40;

/// Kinds of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ViewKind {
    /// Disassembly around a tracked address.
    Disassembly,
    /// Hex dump of a space, region, or shared block.
    Memory,
}

/// A position or size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ViewXY {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl ViewXY {
    /// Builds a position.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// One cell of a view buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewChar {
    /// ASCII glyph.
    pub glyph: u8,
    /// `ATTR_*` bits.
    pub attrib: u8,
}

impl ViewChar {
    /// A blank normal cell.
    pub const BLANK: Self = Self {
        glyph: b' ',
        attrib: ATTR_NORMAL,
    };
}

/// What a setter changed, passed to [`ViewBehavior::notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewChange {
    /// Visible size or scroll position.
    VisibleArea,
    /// Cursor position or visibility.
    Cursor,
    /// Selected source.
    Source,
}

/// Keys a view reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKey {
    /// Cursor up.
    Up,
    /// Cursor down.
    Down,
    /// Cursor left.
    Left,
    /// Cursor right.
    Right,
    /// One screen up.
    PageUp,
    /// One screen down.
    PageDown,
    /// Start of row, or the live PC row.
    Home,
    /// End of row.
    End,
    /// First row.
    CtrlHome,
    /// Last row.
    CtrlEnd,
    /// One chunk left.
    CtrlLeft,
    /// One chunk right.
    CtrlRight,
    /// A typed character.
    Char(char),
}

/// Presentation callback invoked by [`DebugView::flush_updates`].
pub type PresentCallback = Box<dyn FnMut(&ViewCore)>;

/// Geometry, cursor, buffer, and update bookkeeping shared by every view.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ViewCore {
    kind: ViewKind,
    pub(crate) source: usize,
    pub(crate) total: ViewXY,
    pub(crate) visible: ViewXY,
    pub(crate) topleft: ViewXY,
    pub(crate) cursor: ViewXY,
    pub(crate) cursor_visible: bool,
    pub(crate) supports_cursor: bool,
    update_level: u32,
    pub(crate) update_pending: bool,
    refresh_owed: bool,
    recompute_count: u64,
    buffer: Vec<ViewChar>,
}

impl ViewCore {
    fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            source: 0,
            total: ViewXY::new(10, 10),
            visible: ViewXY::new(10, 10),
            topleft: ViewXY::default(),
            cursor: ViewXY::default(),
            cursor_visible: false,
            supports_cursor: false,
            update_level: 0,
            update_pending: false,
            refresh_owed: false,
            recompute_count: 0,
            buffer: Vec::new(),
        }
    }

    /// View kind.
    #[must_use]
    pub const fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Index of the selected source.
    #[must_use]
    pub const fn source_index(&self) -> usize {
        self.source
    }

    /// Size of the whole content.
    #[must_use]
    pub const fn total_size(&self) -> ViewXY {
        self.total
    }

    /// Size of the visible window.
    #[must_use]
    pub const fn visible_size(&self) -> ViewXY {
        self.visible
    }

    /// Content position of the window's top-left cell.
    #[must_use]
    pub const fn visible_position(&self) -> ViewXY {
        self.topleft
    }

    /// Cursor position in content coordinates.
    #[must_use]
    pub const fn cursor_position(&self) -> ViewXY {
        self.cursor
    }

    /// Whether the cursor is shown.
    #[must_use]
    pub const fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    /// Whether this view has a cursor at all.
    #[must_use]
    pub const fn supports_cursor(&self) -> bool {
        self.supports_cursor
    }

    /// Number of recomputes so far.
    #[must_use]
    pub const fn recompute_count(&self) -> u64 {
        self.recompute_count
    }

    /// Whether a recompute is waiting for the outermost update bracket to close.
    #[must_use]
    pub const fn is_update_pending(&self) -> bool {
        self.update_pending
    }

    /// Whether the buffer changed since the last flush.
    #[must_use]
    pub const fn refresh_owed(&self) -> bool {
        self.refresh_owed
    }

    const fn cell_count(&self) -> usize {
        self.visible.x as usize * self.visible.y as usize
    }

    /// Visible cells, row-major, `visible.x` per row.
    #[must_use]
    pub fn buffer(&self) -> &[ViewChar] {
        &self.buffer[..self.cell_count().min(self.buffer.len())]
    }

    /// Glyphs of visible row `row` as a string.
    #[must_use]
    pub fn row_text(&self, row: u32) -> String {
        self.row(row)
            .iter()
            .map(|cell| char::from(cell.glyph))
            .collect()
    }

    /// Cells of visible row `row`.
    #[must_use]
    pub fn row(&self, row: u32) -> &[ViewChar] {
        if row >= self.visible.y {
            return &[];
        }
        let width = self.visible.x as usize;
        let start = row as usize * width;
        self.buffer().get(start..start + width).unwrap_or(&[])
    }

    /// Fills every visible cell with `cell`.
    pub(crate) fn fill(&mut self, cell: ViewChar) {
        let cells = self.cell_count().min(self.buffer.len());
        self.buffer[..cells].fill(cell);
    }

    pub(crate) fn cell_mut(&mut self, x: u32, y: u32) -> Option<&mut ViewChar> {
        if x >= self.visible.x || y >= self.visible.y {
            return None;
        }
        let index = y as usize * self.visible.x as usize + x as usize;
        self.buffer.get_mut(index)
    }

    /// Scrolls horizontally so the cursor stays inside the window, one cell from the edge.
    pub(crate) fn adjust_visible_x_for_cursor(&mut self) {
        if self.cursor.x < self.topleft.x || self.visible.x <= 2 {
            self.topleft.x = self.cursor.x.min(self.topleft.x);
            if self.visible.x <= 2 {
                self.topleft.x = self.cursor.x;
            }
        } else if self.cursor.x >= self.topleft.x + self.visible.x - 1 {
            self.topleft.x = self.cursor.x + 2 - self.visible.x;
        }
    }

    /// Scrolls vertically so the cursor stays inside the window, one row from the edge.
    pub(crate) fn adjust_visible_y_for_cursor(&mut self) {
        if self.cursor.y < self.topleft.y || self.visible.y <= 2 {
            self.topleft.y = self.cursor.y.min(self.topleft.y);
            if self.visible.y <= 2 {
                self.topleft.y = self.cursor.y;
            }
        } else if self.cursor.y >= self.topleft.y + self.visible.y - 1 {
            self.topleft.y = self.cursor.y + 2 - self.visible.y;
        }
    }
}

/// Content-specific half of a view.
pub trait ViewBehavior {
    /// Number of selectable sources.
    fn source_count(&self) -> usize;

    /// Display name of source `index`.
    fn source_name(&self, index: usize) -> Option<&str>;

    /// Device owning source `index`, if any.
    fn source_device(&self, index: usize) -> Option<usize>;

    /// Refills `core`'s buffer. Must not mark the view dirty.
    fn recompute(&mut self, core: &mut ViewCore, ctx: &mut DebugContext<'_>);

    /// Reacts to a setter's change, inside its update bracket.
    fn notify(&mut self, _core: &mut ViewCore, _change: ViewChange) {}

    /// Handles a key; returns `true` when the cursor moved or content changed.
    fn handle_key(&mut self, _core: &mut ViewCore, _key: ViewKey, _ctx: &mut DebugContext<'_>) -> bool {
        false
    }
}

/// A view: shared core plus content behaviour.
pub struct DebugView<B> {
    core: ViewCore,
    behavior: B,
    present: Option<PresentCallback>,
}

impl<B: fmt::Debug> fmt::Debug for DebugView<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugView")
            .field("core", &self.core)
            .field("behavior", &self.behavior)
            .finish_non_exhaustive()
    }
}

impl<B: ViewBehavior> DebugView<B> {
    pub(crate) fn with_behavior(kind: ViewKind, behavior: B) -> Self {
        Self {
            core: ViewCore::new(kind),
            behavior,
            present: None,
        }
    }

    /// Shared state.
    #[must_use]
    pub const fn core(&self) -> &ViewCore {
        &self.core
    }

    /// Content behaviour.
    #[must_use]
    pub const fn behavior(&self) -> &B {
        &self.behavior
    }

    pub(crate) const fn core_mut(&mut self) -> &mut ViewCore {
        &mut self.core
    }

    /// Installs the callback that receives flushed updates.
    pub fn set_presentation(&mut self, present: Option<PresentCallback>) {
        self.present = present;
    }

    /// Opens an update bracket.
    pub const fn begin_update(&mut self) {
        self.core.update_level += 1;
    }

    /// Closes an update bracket; the outermost close runs at most one recompute.
    pub fn end_update(&mut self, ctx: &mut DebugContext<'_>) {
        if self.core.update_level == 1 && self.core.update_pending {
            self.core.update_pending = false;
            self.core.refresh_owed = true;
            let cells = self.core.cell_count();
            if cells > self.core.buffer.len() {
                self.core.buffer = vec![ViewChar::BLANK; cells];
            }
            self.behavior.recompute(&mut self.core, ctx);
            self.core.recompute_count += 1;
        }
        self.core.update_level = self.core.update_level.saturating_sub(1);
    }

    /// Recomputes unconditionally.
    pub fn force_update(&mut self, ctx: &mut DebugContext<'_>) {
        self.begin_update();
        self.core.update_pending = true;
        self.end_update(ctx);
    }

    /// Hands an owed refresh to the presentation callback.
    pub fn flush_updates(&mut self) {
        if self.core.update_level == 0 && self.core.refresh_owed {
            self.core.refresh_owed = false;
            if let Some(present) = self.present.as_mut() {
                present(&self.core);
            }
        }
    }

    /// Runs `change` on the behaviour inside an update bracket and marks the view dirty.
    pub(crate) fn modify(&mut self, ctx: &mut DebugContext<'_>, change: impl FnOnce(&mut B, &mut ViewCore)) {
        self.begin_update();
        change(&mut self.behavior, &mut self.core);
        self.core.update_pending = true;
        self.end_update(ctx);
    }

    fn apply(&mut self, ctx: &mut DebugContext<'_>, kind: ViewChange, change: impl FnOnce(&mut ViewCore)) {
        self.begin_update();
        change(&mut self.core);
        self.core.update_pending = true;
        self.behavior.notify(&mut self.core, kind);
        self.end_update(ctx);
    }

    /// Resizes the visible window.
    pub fn set_visible_size(&mut self, size: ViewXY, ctx: &mut DebugContext<'_>) {
        if size != self.core.visible {
            self.apply(ctx, ViewChange::VisibleArea, |core| core.visible = size);
        }
    }

    /// Scrolls the visible window.
    pub fn set_visible_position(&mut self, position: ViewXY, ctx: &mut DebugContext<'_>) {
        if position != self.core.topleft {
            self.apply(ctx, ViewChange::VisibleArea, |core| core.topleft = position);
        }
    }

    /// Moves the cursor.
    pub fn set_cursor_position(&mut self, position: ViewXY, ctx: &mut DebugContext<'_>) {
        if position != self.core.cursor {
            self.apply(ctx, ViewChange::Cursor, |core| core.cursor = position);
        }
    }

    /// Shows or hides the cursor.
    pub fn set_cursor_visible(&mut self, visible: bool, ctx: &mut DebugContext<'_>) {
        if visible != self.core.cursor_visible {
            self.apply(ctx, ViewChange::Cursor, |core| core.cursor_visible = visible);
        }
    }

    /// Selects source `index`; out-of-range indices are ignored.
    pub fn set_source(&mut self, index: usize, ctx: &mut DebugContext<'_>) {
        if index != self.core.source && index < self.behavior.source_count() {
            self.apply(ctx, ViewChange::Source, |core| core.source = index);
        }
    }

    /// Number of selectable sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.behavior.source_count()
    }

    /// Display name of source `index`.
    #[must_use]
    pub fn source_name(&self, index: usize) -> Option<&str> {
        self.behavior.source_name(index)
    }

    /// First source owned by `device`.
    #[must_use]
    pub fn source_for_device(&self, device: usize) -> Option<usize> {
        (0..self.behavior.source_count()).find(|&index| self.behavior.source_device(index) == Some(device))
    }

    /// Feeds a key to the view.
    pub fn handle_key(&mut self, key: ViewKey, ctx: &mut DebugContext<'_>) {
        self.begin_update();
        if self.behavior.handle_key(&mut self.core, key, ctx) {
            self.core.update_pending = true;
            self.behavior.notify(&mut self.core, ViewChange::Cursor);
        }
        self.end_update(ctx);
    }
}

/// Opaque handle to a view owned by a [`ViewManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u32);

/// A view of either kind.
#[derive(Debug)]
pub enum ViewSlot {
    /// Disassembly view.
    Disassembly(DebugView<DisassemblyView>),
    /// Memory view.
    Memory(DebugView<MemoryView>),
}

impl ViewSlot {
    /// View kind.
    #[must_use]
    pub const fn kind(&self) -> ViewKind {
        match self {
            Self::Disassembly(_) => ViewKind::Disassembly,
            Self::Memory(_) => ViewKind::Memory,
        }
    }

    /// Shared state.
    #[must_use]
    pub const fn core(&self) -> &ViewCore {
        match self {
            Self::Disassembly(view) => view.core(),
            Self::Memory(view) => view.core(),
        }
    }

    /// The disassembly view, if this is one.
    pub fn as_disassembly_mut(&mut self) -> Option<&mut DebugView<DisassemblyView>> {
        match self {
            Self::Disassembly(view) => Some(view),
            Self::Memory(_) => None,
        }
    }

    /// The memory view, if this is one.
    pub fn as_memory_mut(&mut self) -> Option<&mut DebugView<MemoryView>> {
        match self {
            Self::Memory(view) => Some(view),
            Self::Disassembly(_) => None,
        }
    }

    /// See [`DebugView::force_update`].
    pub fn force_update(&mut self, ctx: &mut DebugContext<'_>) {
        match self {
            Self::Disassembly(view) => view.force_update(ctx),
            Self::Memory(view) => view.force_update(ctx),
        }
    }

    /// See [`DebugView::flush_updates`].
    pub fn flush_updates(&mut self) {
        match self {
            Self::Disassembly(view) => view.flush_updates(),
            Self::Memory(view) => view.flush_updates(),
        }
    }

    /// See [`DebugView::set_visible_size`].
    pub fn set_visible_size(&mut self, size: ViewXY, ctx: &mut DebugContext<'_>) {
        match self {
            Self::Disassembly(view) => view.set_visible_size(size, ctx),
            Self::Memory(view) => view.set_visible_size(size, ctx),
        }
    }

    /// See [`DebugView::set_cursor_visible`].
    pub fn set_cursor_visible(&mut self, visible: bool, ctx: &mut DebugContext<'_>) {
        match self {
            Self::Disassembly(view) => view.set_cursor_visible(visible, ctx),
            Self::Memory(view) => view.set_cursor_visible(visible, ctx),
        }
    }

    /// See [`DebugView::handle_key`].
    pub fn handle_key(&mut self, key: ViewKey, ctx: &mut DebugContext<'_>) {
        match self {
            Self::Disassembly(view) => view.handle_key(key, ctx),
            Self::Memory(view) => view.handle_key(key, ctx),
        }
    }

    /// See [`DebugView::set_presentation`].
    pub fn set_presentation(&mut self, present: Option<PresentCallback>) {
        match self {
            Self::Disassembly(view) => view.set_presentation(present),
            Self::Memory(view) => view.set_presentation(present),
        }
    }
}

/// Owns every view of a session.
#[derive(Debug, Default)]
pub struct ViewManager {
    views: BTreeMap<ViewId, ViewSlot>,
    next_id: u32,
}

impl ViewManager {
    /// No views.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a view of `kind`.
    ///
    /// # Errors
    ///
    /// [`DebugError::NoSources`] when nothing of that kind can be shown.
    pub fn alloc(
        &mut self,
        kind: ViewKind,
        config: &DebugConfig,
        ctx: &mut DebugContext<'_>,
    ) -> Result<ViewId, DebugError> {
        let slot = match kind {
            ViewKind::Disassembly => ViewSlot::Disassembly(DisassemblyView::create(config, ctx)?),
            ViewKind::Memory => ViewSlot::Memory(MemoryView::create(config, ctx)?),
        };
        let id = ViewId(self.next_id);
        self.next_id += 1;
        log::debug!("allocated {kind:?} view {id:?}");
        self.views.insert(id, slot);
        Ok(id)
    }

    /// Destroys view `id`.
    pub fn free(&mut self, id: ViewId) -> bool {
        self.views.remove(&id).is_some()
    }

    /// View `id`.
    #[must_use]
    pub fn get(&self, id: ViewId) -> Option<&ViewSlot> {
        self.views.get(&id)
    }

    /// View `id`, mutably.
    pub fn get_mut(&mut self, id: ViewId) -> Option<&mut ViewSlot> {
        self.views.get_mut(&id)
    }

    /// Number of views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Returns `true` when there are no views.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Forces a recompute of every view, or only those of `kind`.
    pub fn update_all(&mut self, ctx: &mut DebugContext<'_>, kind: Option<ViewKind>) {
        for view in self.views.values_mut() {
            if kind.is_none_or(|kind| kind == view.kind()) {
                view.force_update(ctx);
            }
        }
    }

    /// Flushes owed refreshes of every view.
    pub fn flush_updates(&mut self) {
        self.views.values_mut().for_each(ViewSlot::flush_updates);
    }
}
