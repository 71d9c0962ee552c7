//! Memory view: hex dump of an address space, a region, or a shared block.
//!
//! Rows are `bytes_per_row` wide and aligned to a byte offset taken from the home address,
//! so scrolling never shifts the column layout. The cursor lives as an (address, nibble
//! shift) pair; the on-screen position is derived from it through the chunk layout table.

use crate::api::{BlobKind, DebugConfig};
use crate::context::DebugContext;
use crate::error::DebugError;
use crate::expression::ExpressionBinding;
use crate::memory::{AccessSize, AddressSpaceInfo, SpaceRef};
use crate::view::{
    DebugView, ViewBehavior, ViewChange, ViewChar, ViewCore, ViewKey, ViewKind, ViewSource, ViewXY,
    ATTR_ANCILLARY, ATTR_NORMAL, ATTR_SELECTED,
};

/// Shift value marking a separator column.
const SPACER: u8 = 0x80;

/// Per-column nibble shift within a chunk, most significant first. Entries with the spacer
/// bit render blank but still map the cursor to the neighbouring nibble.
const fn chunk_layout(chunk: u8) -> Option<&'static [u8]> {
    match chunk {
        1 => Some(&[0x04, 0x00, 0x80]),
        2 => Some(&[0x8c, 0x0c, 0x08, 0x04, 0x00, 0x80]),
        4 => Some(&[
            0x9c, 0x9c, 0x1c, 0x18, 0x14, 0x10, 0x0c, 0x08, 0x04, 0x00, 0x80, 0x80,
        ]),
        8 => Some(&[
            0xbc, 0xbc, 0xbc, 0xbc, 0x3c, 0x38, 0x34, 0x30, 0x2c, 0x28, 0x24, 0x20, 0x1c, 0x18,
            0x14, 0x10, 0x0c, 0x08, 0x04, 0x00, 0x80, 0x80, 0x80, 0x80,
        ]),
        _ => None,
    }
}

/// What a memory view source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryTarget {
    /// An address space of a device.
    Space(SpaceRef),
    /// A region or shared block, by blob index.
    Blob(usize),
}

/// Cursor as a byte address plus the bit shift of the selected nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryCursor {
    /// Byte address of the chunk under the cursor.
    pub address: u64,
    /// Bit shift of the selected nibble within the chunk.
    pub shift: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemorySource {
    target: MemoryTarget,
    chunk: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Section {
    pos: u32,
    width: u32,
}

impl Section {
    const fn contains(self, column: u32) -> bool {
        column >= self.pos && column < self.pos + self.width
    }
}

/// Geometry derived from the settings and the source at the last relayout.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Layout {
    chunk: u8,
    chunks_per_row: u32,
    byte_offset: u64,
    max_byte: u64,
    address_chars: usize,
    space: Option<AddressSpaceInfo>,
    reverse: bool,
    sections: [Section; 3],
}

impl Layout {
    const fn bytes_per_row(&self) -> u64 {
        self.chunk as u64 * self.chunks_per_row as u64
    }

    const fn spacing(&self) -> u32 {
        3 * self.chunk as u32
    }

    const fn top_shift(&self) -> u8 {
        self.chunk * 8 - 4
    }

    fn row_count(&self) -> u32 {
        let rows = (self.max_byte - self.byte_offset.min(self.max_byte)) / self.bytes_per_row() + 1;
        u32::try_from(rows).unwrap_or(u32::MAX)
    }

    fn row_label(&self, byte: u64) -> String {
        let address = self.space.as_ref().map_or(byte, |info| info.byte_to_address(byte));
        format!("{address:0width$X}", width = self.address_chars)
    }
}

/// Content half of a memory view.
#[derive(Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct MemoryView {
    sources: Vec<ViewSource<MemorySource>>,
    expression: ExpressionBinding,
    chunk_size: u8,
    chunks_per_row: u32,
    reverse: bool,
    ascii: bool,
    physical: bool,
    layout: Layout,
    relayout: bool,
}

fn source_name(kind: BlobKind, name: &str) -> String {
    match kind {
        BlobKind::Region => format!("Region '{name}'"),
        BlobKind::SharedBlock => format!("Shared '{name}'"),
    }
}

impl MemoryView {
    pub(crate) fn create(
        config: &DebugConfig,
        ctx: &mut DebugContext<'_>,
    ) -> Result<DebugView<Self>, DebugError> {
        let mut sources = Vec::new();
        for cpu in ctx.controllers() {
            for (index, info) in cpu.spaces() {
                let target = MemorySource {
                    target: MemoryTarget::Space(SpaceRef::new(cpu.index(), index)),
                    chunk: info.bus_bytes().clamp(1, 8),
                };
                let name = format!("{} '{}' {} space memory", cpu.name(), cpu.tag(), info.name());
                sources.push(ViewSource::new(name, Some(cpu.index()), target));
            }
        }
        for (index, blob) in ctx.host().blobs().into_iter().enumerate() {
            let target = MemorySource {
                target: MemoryTarget::Blob(index),
                chunk: blob.width.clamp(1, 8),
            };
            sources.push(ViewSource::new(source_name(blob.kind, &blob.name), None, target));
        }
        if sources.is_empty() {
            return Err(DebugError::NoSources(ViewKind::Memory));
        }

        let initial = ctx
            .state()
            .visible_cpu()
            .and_then(|cpu| {
                sources.iter().position(|source| {
                    source.target().target == MemoryTarget::Space(SpaceRef::program(cpu))
                })
            })
            .unwrap_or(0);
        let chunk = sources[initial].target().chunk;
        let mut expression = ExpressionBinding::new("0");
        expression.set_context(sources[initial].device());
        let behavior = Self {
            sources,
            expression,
            chunk_size: chunk,
            chunks_per_row: (config.memory_default_chunks_per_row / u32::from(chunk)).max(1),
            reverse: false,
            ascii: true,
            physical: false,
            layout: Layout {
                chunk,
                chunks_per_row: 1,
                byte_offset: 0,
                max_byte: 0,
                address_chars: 0,
                space: None,
                reverse: false,
                sections: [Section::default(); 3],
            },
            relayout: true,
        };
        let mut view = DebugView::with_behavior(ViewKind::Memory, behavior);
        let core = view.core_mut();
        core.source = initial;
        core.supports_cursor = true;
        view.force_update(ctx);
        Ok(view)
    }

    /// Home address expression text.
    #[must_use]
    pub fn expression_text(&self) -> &str {
        self.expression.text()
    }

    /// Bytes per chunk in effect.
    #[must_use]
    pub const fn chunk_size(&self) -> u8 {
        self.layout.chunk
    }

    /// Chunks per row.
    #[must_use]
    pub const fn chunks_per_row(&self) -> u32 {
        self.chunks_per_row
    }

    /// Whether the layout is mirrored.
    #[must_use]
    pub const fn is_reversed(&self) -> bool {
        self.reverse
    }

    /// Whether the ASCII column is shown.
    #[must_use]
    pub const fn shows_ascii(&self) -> bool {
        self.ascii
    }

    /// Whether space sources bypass translation.
    #[must_use]
    pub const fn is_physical(&self) -> bool {
        self.physical
    }

    fn target(&self, core: &ViewCore) -> Option<MemoryTarget> {
        self.sources.get(core.source).map(|source| source.target().target)
    }

    fn read(&self, ctx: &mut DebugContext<'_>, target: MemoryTarget, byte: u64, size: AccessSize) -> Option<u64> {
        match target {
            MemoryTarget::Space(space) => ctx.read_space_checked(space, byte, size, !self.physical),
            MemoryTarget::Blob(index) => {
                let end = byte.checked_add(u64::from(size.bytes()))?;
                if end > ctx.blob_len(index)? as u64 {
                    return None;
                }
                ctx.read_blob(index, byte, size)
            }
        }
    }

    fn write(&self, ctx: &mut DebugContext<'_>, target: MemoryTarget, byte: u64, size: AccessSize, value: u64) {
        match target {
            MemoryTarget::Space(space) => ctx.write_space(space, byte, size, value, !self.physical),
            MemoryTarget::Blob(index) => ctx.write_blob(index, byte, size, value),
        }
    }

    /// Rebuilds the layout from the settings and the current source.
    fn build_layout(&self, core: &ViewCore, ctx: &mut DebugContext<'_>) -> Option<Layout> {
        let (max_byte, address_chars, min_chunk, space) = match self.target(core)? {
            MemoryTarget::Space(space) => {
                let info = ctx.controller(space.device)?.space(space.space)?;
                let (mask, chars) = if self.physical {
                    (info.byte_mask(), info.address_chars())
                } else {
                    (info.logical_byte_mask(), info.logical_address_chars())
                };
                (mask, chars, info.address_to_byte(1).max(1), Some(info.clone()))
            }
            MemoryTarget::Blob(index) => {
                let max = (ctx.blob_len(index)? as u64).saturating_sub(1);
                (max, format!("{max:X}").len(), 1, None)
            }
        };
        let chunk = u8::try_from(u64::from(self.chunk_size).max(min_chunk).next_power_of_two().min(8))
            .unwrap_or(8);
        let mut layout = Layout {
            chunk,
            chunks_per_row: self.chunks_per_row,
            byte_offset: self.layout.byte_offset,
            max_byte,
            address_chars,
            space,
            reverse: self.reverse,
            sections: [Section::default(); 3],
        };
        layout.byte_offset %= layout.bytes_per_row();
        let bytes_per_row = self.chunks_per_row * u32::from(chunk);
        let widths = [
            1 + u32::try_from(address_chars).unwrap_or(16).max(8) + 1,
            1 + 3 * bytes_per_row + 1,
            if self.ascii { 1 + bytes_per_row + 1 } else { 0 },
        ];
        let positions = if self.reverse {
            [widths[2] + widths[1], widths[2], 0]
        } else {
            [0, widths[0], widths[0] + widths[1]]
        };
        for (section, (pos, width)) in layout.sections.iter_mut().zip(positions.into_iter().zip(widths)) {
            *section = Section { pos, width };
        }
        Some(layout)
    }

    fn total_size(&self) -> ViewXY {
        let width = self.layout.sections.iter().map(|section| section.width).sum();
        ViewXY::new(width, self.layout.row_count())
    }

    /// Cursor position under screen cell `cursor`.
    fn cursor_at(&self, cursor: ViewXY) -> MemoryCursor {
        let layout = &self.layout;
        let Some(shifts) = chunk_layout(layout.chunk) else {
            return MemoryCursor::default();
        };
        let spacing = layout.spacing();
        let span = spacing * layout.chunks_per_row;
        let column = cursor
            .x
            .saturating_sub(layout.sections[1].pos + 1)
            .min(span.saturating_sub(1));
        let mut chunk_index = column / spacing;
        if layout.reverse {
            chunk_index = layout.chunks_per_row - 1 - chunk_index;
        }
        let address = layout.byte_offset
            + u64::from(cursor.y) * layout.bytes_per_row()
            + u64::from(chunk_index) * u64::from(layout.chunk);
        MemoryCursor {
            address,
            shift: shifts[(column % spacing) as usize] & !SPACER,
        }
    }

    /// Moves `core`'s cursor onto `position` and scrolls it into view.
    fn place_cursor(&self, core: &mut ViewCore, position: MemoryCursor) {
        let layout = &self.layout;
        let Some(shifts) = chunk_layout(layout.chunk) else {
            return;
        };
        let relative = position.address.max(layout.byte_offset) - layout.byte_offset;
        let row = relative / layout.bytes_per_row();
        let mut chunk_index =
            u32::try_from((relative % layout.bytes_per_row()) / u64::from(layout.chunk)).unwrap_or(0);
        if layout.reverse {
            chunk_index = layout.chunks_per_row - 1 - chunk_index;
        }
        let within = shifts
            .iter()
            .position(|&shift| shift == position.shift)
            .unwrap_or(shifts.len());
        let within = u32::try_from(within).unwrap_or(0);
        let x = within + layout.sections[1].pos + 1 + layout.spacing() * chunk_index;
        core.cursor.x = x.min(core.total.x.saturating_sub(1));
        core.cursor.y = u32::try_from(row)
            .unwrap_or(u32::MAX)
            .min(core.total.y.saturating_sub(1));
        core.adjust_visible_x_for_cursor();
        core.adjust_visible_y_for_cursor();
    }

    fn home_byte(&self, layout: &Layout) -> u64 {
        let value = self.expression.value();
        layout.space.as_ref().map_or(value, |info| {
            let mask = if self.physical {
                info.byte_mask()
            } else {
                info.logical_byte_mask()
            };
            info.address_to_byte(value) & mask
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn render(&self, core: &mut ViewCore, ctx: &mut DebugContext<'_>, target: MemoryTarget) {
        let layout = &self.layout;
        let Some(shifts) = chunk_layout(layout.chunk) else {
            return;
        };
        let Some(size) = AccessSize::from_bytes(layout.chunk) else {
            return;
        };
        let visible = core.visible;
        let topleft = core.topleft;
        let data = layout.sections[1];
        for y in 0..visible.y {
            let row = topleft.y + y;
            for x in 0..visible.x {
                let column = topleft.x + x;
                let attrib = if data.contains(column) {
                    if core.cursor_visible && row == core.cursor.y && column == core.cursor.x {
                        ATTR_NORMAL | ATTR_SELECTED
                    } else {
                        ATTR_NORMAL
                    }
                } else {
                    ATTR_ANCILLARY
                };
                if let Some(cell) = core.cell_mut(x, y) {
                    *cell = ViewChar { glyph: b' ', attrib };
                }
            }
            if row >= core.total.y {
                continue;
            }

            let put = |core: &mut ViewCore, column: u32, glyph: u8| {
                if let Some(x) = column.checked_sub(topleft.x) {
                    if let Some(cell) = core.cell_mut(x, y) {
                        cell.glyph = glyph;
                    }
                }
            };
            let row_byte = layout.byte_offset + u64::from(row) * layout.bytes_per_row();
            for (offset, glyph) in layout.row_label(row_byte).bytes().enumerate() {
                if offset as u32 + 1 < layout.sections[0].width {
                    put(core, layout.sections[0].pos + 1 + offset as u32, glyph);
                }
            }
            for chunk in 0..layout.chunks_per_row {
                let index = if layout.reverse {
                    layout.chunks_per_row - 1 - chunk
                } else {
                    chunk
                };
                let address = row_byte + u64::from(chunk) * u64::from(layout.chunk);
                let value = self.read(ctx, target, address, size);
                let start = data.pos + 1 + index * layout.spacing();
                for (offset, &shift) in shifts.iter().enumerate() {
                    if shift & SPACER == 0 {
                        let glyph = value.map_or(b'*', |value| {
                            b"0123456789ABCDEF"[((value >> shift) & 0x0f) as usize]
                        });
                        put(core, start + offset as u32, glyph);
                    }
                }
            }
            if layout.sections[2].width > 0 {
                let start = layout.sections[2].pos + 1;
                for offset in 0..layout.bytes_per_row() {
                    let glyph = self
                        .read(ctx, target, row_byte + offset, AccessSize::Byte)
                        .map(|value| value as u8)
                        .filter(|byte| byte.is_ascii_graphic() || *byte == b' ')
                        .unwrap_or(b'.');
                    put(core, start + offset as u32, glyph);
                }
            }
        }
    }

    fn move_cursor(
        &self,
        mut position: MemoryCursor,
        key: ViewKey,
        visible_rows: u32,
        ctx: &mut DebugContext<'_>,
        target: MemoryTarget,
    ) -> Option<MemoryCursor> {
        let layout = &self.layout;
        let chunk = u64::from(layout.chunk);
        let row = layout.bytes_per_row();
        let offset = layout.byte_offset;
        let max = layout.max_byte;
        let top = layout.top_shift();
        let right = |mut position: MemoryCursor| {
            if position.shift == 0 {
                if position.address.saturating_add(chunk) <= max {
                    position.shift = top;
                    position.address += chunk;
                }
            } else {
                position.shift -= 4;
            }
            position
        };
        match key {
            ViewKey::Up => {
                if position.address >= offset + row {
                    position.address -= row;
                }
            }
            ViewKey::Down => {
                if position.address.saturating_add(row) <= max {
                    position.address += row;
                }
            }
            ViewKey::PageUp | ViewKey::PageDown => {
                let mut delta = u64::from(visible_rows.saturating_sub(2)) * row;
                while delta > 0 {
                    if key == ViewKey::PageUp && position.address >= offset + delta {
                        position.address -= delta;
                        break;
                    }
                    if key == ViewKey::PageDown && position.address.saturating_add(delta) <= max {
                        position.address += delta;
                        break;
                    }
                    delta -= row;
                }
            }
            ViewKey::Home => {
                position.address -= (position.address - offset) % row;
                position.shift = top;
            }
            ViewKey::End => {
                position.address = position.address - (position.address - offset) % row + row - chunk;
                position.shift = 0;
            }
            ViewKey::CtrlHome => {
                position.address = offset;
                position.shift = top;
            }
            ViewKey::CtrlEnd => {
                position.address = max.saturating_sub(max.saturating_sub(offset) % chunk);
                position.shift = 0;
            }
            ViewKey::CtrlLeft => {
                if position.address >= offset + chunk {
                    position.address -= chunk;
                }
            }
            ViewKey::CtrlRight => {
                if position.address.saturating_add(chunk) <= max {
                    position.address += chunk;
                }
            }
            ViewKey::Left => {
                if position.shift == top {
                    if position.address >= offset + chunk {
                        position.shift = 0;
                        position.address -= chunk;
                    }
                } else {
                    position.shift += 4;
                }
            }
            ViewKey::Right => position = right(position),
            ViewKey::Char(ch) => {
                let digit = u64::from(ch.to_digit(16)?);
                let size = AccessSize::from_bytes(layout.chunk)?;
                let value = self.read(ctx, target, position.address, size)?;
                let value = (value & !(0x0f << position.shift)) | (digit << position.shift);
                self.write(ctx, target, position.address, size, value);
                position = right(position);
            }
        }
        Some(position)
    }
}

impl ViewBehavior for MemoryView {
    fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn source_name(&self, index: usize) -> Option<&str> {
        self.sources.get(index).map(ViewSource::name)
    }

    fn source_device(&self, index: usize) -> Option<usize> {
        self.sources.get(index).and_then(ViewSource::device)
    }

    fn recompute(&mut self, core: &mut ViewCore, ctx: &mut DebugContext<'_>) {
        let Some(target) = self.target(core) else {
            core.fill(ViewChar::BLANK);
            return;
        };
        let moved = self.expression.recompute(ctx);
        if self.relayout || moved {
            let position = self.cursor_at(core.cursor);
            let Some(mut layout) = self.build_layout(core, ctx) else {
                core.fill(ViewChar::BLANK);
                return;
            };
            if moved {
                let home = self.home_byte(&layout);
                layout.byte_offset = home % layout.bytes_per_row();
                self.layout = layout;
                core.total = self.total_size();
                let row = (home - self.layout.byte_offset) / self.layout.bytes_per_row();
                core.topleft.y = u32::try_from(row)
                    .unwrap_or(u32::MAX)
                    .min(core.total.y.saturating_sub(1));
                let top = self.layout.top_shift();
                self.place_cursor(core, MemoryCursor { address: home, shift: top });
            } else {
                self.layout = layout;
                core.total = self.total_size();
                self.place_cursor(core, position);
            }
            self.relayout = false;
        }
        self.render(core, ctx, target);
    }

    fn notify(&mut self, core: &mut ViewCore, change: ViewChange) {
        match change {
            ViewChange::Cursor => {
                let position = self.cursor_at(core.cursor);
                self.place_cursor(core, position);
            }
            ViewChange::Source => {
                if let Some(source) = self.sources.get(core.source) {
                    let preferred = source.target().chunk;
                    let bytes_per_row = self.chunks_per_row * u32::from(self.chunk_size);
                    self.chunks_per_row = (bytes_per_row / u32::from(preferred)).max(1);
                    self.chunk_size = preferred;
                    let device = source.device();
                    self.expression.set_context(device);
                }
                self.relayout = true;
            }
            ViewChange::VisibleArea => {}
        }
    }

    fn handle_key(&mut self, core: &mut ViewCore, key: ViewKey, ctx: &mut DebugContext<'_>) -> bool {
        let Some(target) = self.target(core) else {
            return false;
        };
        let position = self.cursor_at(core.cursor);
        match self.move_cursor(position, key, core.visible.y, ctx, target) {
            Some(position) => {
                self.place_cursor(core, position);
                true
            }
            None => false,
        }
    }
}

impl DebugView<MemoryView> {
    /// Byte address under the cursor.
    #[must_use]
    pub fn cursor(&self) -> MemoryCursor {
        self.behavior.cursor_at(self.core.cursor)
    }

    /// Address under the cursor, in the source's address units.
    #[must_use]
    pub fn cursor_address(&self) -> u64 {
        let byte = self.cursor().address;
        self.behavior
            .layout
            .space
            .as_ref()
            .map_or(byte, |info| info.byte_to_address(byte))
    }

    /// Replaces the home address expression.
    pub fn set_expression(&mut self, text: &str, ctx: &mut DebugContext<'_>) {
        self.modify(ctx, |view, _| view.expression.set_text(text));
    }

    /// Home address expression text.
    #[must_use]
    pub fn expression_text(&self) -> &str {
        self.behavior.expression_text()
    }

    /// Sets the chunk size.
    ///
    /// # Errors
    ///
    /// [`DebugError::UnsupportedChunkSize`] unless `bytes` is 1, 2, 4 or 8.
    pub fn set_chunk_size(&mut self, bytes: u8, ctx: &mut DebugContext<'_>) -> Result<(), DebugError> {
        if chunk_layout(bytes).is_none() {
            log::warn!("rejected memory view chunk size {bytes}");
            return Err(DebugError::UnsupportedChunkSize(bytes));
        }
        if bytes != self.behavior.chunk_size {
            self.modify(ctx, |view, _| {
                view.chunk_size = bytes;
                view.relayout = true;
            });
        }
        Ok(())
    }

    /// Sets the row width in chunks; zero is ignored.
    pub fn set_chunks_per_row(&mut self, chunks: u32, ctx: &mut DebugContext<'_>) {
        if chunks != 0 && chunks != self.behavior.chunks_per_row {
            self.modify(ctx, |view, _| {
                view.chunks_per_row = chunks;
                view.relayout = true;
            });
        }
    }

    /// Mirrors the layout.
    pub fn set_reverse(&mut self, reverse: bool, ctx: &mut DebugContext<'_>) {
        if reverse != self.behavior.reverse {
            self.modify(ctx, |view, _| {
                view.reverse = reverse;
                view.relayout = true;
            });
        }
    }

    /// Shows or hides the ASCII column.
    pub fn set_ascii(&mut self, ascii: bool, ctx: &mut DebugContext<'_>) {
        if ascii != self.behavior.ascii {
            self.modify(ctx, |view, _| {
                view.ascii = ascii;
                view.relayout = true;
            });
        }
    }

    /// Bypasses translation for space sources.
    pub fn set_physical(&mut self, physical: bool, ctx: &mut DebugContext<'_>) {
        if physical != self.behavior.physical {
            self.modify(ctx, |view, _| {
                view.physical = physical;
                view.relayout = true;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{chunk_layout, SPACER};

    #[rstest]
    #[case(1, 3)]
    #[case(2, 6)]
    #[case(4, 12)]
    #[case(8, 24)]
    fn layout_spans_three_columns_per_byte(#[case] chunk: u8, #[case] spacing: usize) {
        let shifts = chunk_layout(chunk).unwrap();
        assert_eq!(shifts.len(), spacing);
        let digits = shifts.iter().filter(|&&shift| shift & SPACER == 0).count();
        assert_eq!(digits, 2 * usize::from(chunk));
        assert_eq!(shifts.iter().find(|&&shift| shift & SPACER == 0), Some(&(chunk * 8 - 4)));
    }

    #[test]
    fn odd_chunk_sizes_have_no_layout() {
        for chunk in [0, 3, 5, 6, 7, 16] {
            assert!(chunk_layout(chunk).is_none());
        }
    }
}
