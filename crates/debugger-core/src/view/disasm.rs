//! Disassembly view: a window of instructions around a tracked home address.
//!
//! Rows are generated from a start address found by scanning back a few instructions from
//! the home address, then disassembling forward. Each row keeps its byte address so the live
//! PC and breakpoints can be matched without re-disassembling.

use crate::api::DebugConfig;
use crate::context::DebugContext;
use crate::controller::DebugController;
use crate::error::DebugError;
use crate::expression::ExpressionBinding;
use crate::memory::{AccessSize, AddressSpaceInfo, SpaceRef, TranslateIntent, PROGRAM_SPACE};
use crate::view::{
    DebugView, ViewBehavior, ViewChange, ViewChar, ViewCore, ViewKey, ViewKind, ViewSource, ViewXY,
    ATTR_ANCILLARY, ATTR_CHANGED, ATTR_COMMENT, ATTR_CURRENT, ATTR_DISABLED, ATTR_NORMAL,
    ATTR_SELECTED,
};

/// Widest raw-byte column, in bytes.
const MAX_RAW_BYTES: u32 = 16;
/// Width of the comment column.
const COMMENT_WIDTH: u32 = 50;
/// Rows kept between the cursor and the window edge on page up/down.
const PAGE_END_BUFFER: u32 = 3;
/// Rows kept above the home address when it is scrolled into view.
const HOME_CONTEXT_ROWS: u32 = 3;

/// What the column right of the mnemonic shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RightColumn {
    /// Raw argument bytes.
    #[default]
    Raw,
    /// Decrypted opcode bytes.
    Decrypted,
    /// Comments attached to the instruction.
    Comments,
    /// Nothing.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DisasmRow {
    address: u64,
    byte_address: u64,
    text: String,
}

/// Content half of a disassembly view.
#[derive(Debug)]
pub struct DisassemblyView {
    sources: Vec<ViewSource<usize>>,
    expression: ExpressionBinding,
    right_column: RightColumn,
    backward_steps: u32,
    dasm_width: u32,
    total_lines: u32,
    rows: Vec<DisasmRow>,
    divider1: u32,
    divider2: u32,
    last_opcode_token: u64,
    last_change_count: u32,
    recompute: bool,
}

/// Width of a full row for a given right column.
fn total_width(divider2: u32, right: RightColumn, min_bytes: u32, max_bytes: u32) -> u32 {
    match right {
        RightColumn::Raw | RightColumn::Decrypted => {
            let max = max_bytes.min(MAX_RAW_BYTES);
            let groups = max / min_bytes.max(1);
            divider2 + 1 + 2 * max + groups.saturating_sub(1) + 1
        }
        RightColumn::Comments => divider2 + 1 + COMMENT_WIDTH,
        RightColumn::None => divider2 + 1,
    }
}

/// Fits `text` into `width` columns, ending with an ellipsis when bytes were left out.
fn elide(mut text: String, width: usize, truncated: bool) -> String {
    if truncated && width > 3 {
        text.truncate(width - 1);
        while text.len() < width - 1 {
            text.push(' ');
        }
        text.replace_range(width - 4.., "...");
    }
    text
}

/// Hex chunks `step` bytes apart across `count` bytes, kept within `max_chars - 1` columns.
fn join_chunks(
    mut read: impl FnMut(u64) -> u64,
    step: u64,
    count: u64,
    digits: usize,
    max_chars: usize,
) -> String {
    let mut text = String::new();
    if max_chars >= digits {
        text.push_str(&format!("{:0digits$X}", read(0)));
    }
    let mut offset = step;
    while offset < count && text.len() + 1 + digits < max_chars {
        text.push_str(&format!(" {:0digits$X}", read(offset)));
        offset += step;
    }
    elide(text, max_chars, offset < count && offset != step)
}

struct SourceGeometry<'a> {
    cpu: usize,
    controller: &'a DebugController,
    info: &'a AddressSpaceInfo,
}

impl SourceGeometry<'_> {
    fn space(&self) -> SpaceRef {
        SpaceRef::program(self.cpu)
    }

    fn to_byte(&self, address: u64) -> u64 {
        self.info.address_to_byte(address) & self.info.logical_byte_mask()
    }

    fn min_length(&self) -> u64 {
        self.info
            .byte_to_address(u64::from(self.controller.min_opcode_bytes()))
            .max(1)
    }

    fn max_length(&self) -> u64 {
        self.info
            .byte_to_address(u64::from(self.controller.max_opcode_bytes()))
            .max(1)
    }
}

impl DisassemblyView {
    pub(crate) fn create(
        config: &DebugConfig,
        ctx: &mut DebugContext<'_>,
    ) -> Result<DebugView<Self>, DebugError> {
        let sources: Vec<_> = ctx
            .controllers()
            .iter()
            .filter(|cpu| cpu.has_disassembly() && cpu.space(PROGRAM_SPACE).is_some())
            .map(|cpu| {
                ViewSource::new(
                    format!("{} '{}'", cpu.name(), cpu.tag()),
                    Some(cpu.index()),
                    cpu.index(),
                )
            })
            .collect();
        if sources.is_empty() {
            return Err(DebugError::NoSources(ViewKind::Disassembly));
        }
        let initial = ctx
            .state()
            .visible_cpu()
            .and_then(|cpu| sources.iter().position(|source| source.device() == Some(cpu)))
            .unwrap_or(0);
        let mut expression = ExpressionBinding::new("curpc");
        expression.set_context(sources[initial].device());
        let behavior = Self {
            sources,
            expression,
            right_column: RightColumn::Raw,
            backward_steps: config.disasm_backward_steps,
            dasm_width: config.disasm_mnemonic_width,
            total_lines: config.disasm_default_lines.max(1),
            rows: Vec::new(),
            divider1: 0,
            divider2: 0,
            last_opcode_token: 0,
            last_change_count: 0,
            recompute: true,
        };
        let mut view = DebugView::with_behavior(ViewKind::Disassembly, behavior);
        let core = view.core_mut();
        core.source = initial;
        core.supports_cursor = true;
        core.total = ViewXY::new(1, config.disasm_default_lines.max(1));
        view.force_update(ctx);
        Ok(view)
    }

    /// Home address expression text.
    #[must_use]
    pub fn expression_text(&self) -> &str {
        self.expression.text()
    }

    /// Right column mode.
    #[must_use]
    pub const fn right_column(&self) -> RightColumn {
        self.right_column
    }

    /// Instructions scanned back from the home address.
    #[must_use]
    pub const fn backward_steps(&self) -> u32 {
        self.backward_steps
    }

    /// Mnemonic column width.
    #[must_use]
    pub const fn disasm_width(&self) -> u32 {
        self.dasm_width
    }

    /// Logical address shown on content row `row`.
    #[must_use]
    pub fn row_address(&self, row: u32) -> Option<u64> {
        self.rows.get(row as usize).map(|row| row.address)
    }

    fn geometry<'a>(&self, core: &ViewCore, ctx: &DebugContext<'a>) -> Option<SourceGeometry<'a>> {
        let cpu = *self.sources.get(core.source)?.target();
        let controller = ctx.controller(cpu)?;
        let info = controller.space(PROGRAM_SPACE)?;
        Some(SourceGeometry { cpu, controller, info })
    }

    fn home_address(&self, geometry: &SourceGeometry<'_>) -> u64 {
        let value = self.expression.value() & geometry.info.logical_address_mask();
        value - value % geometry.min_length()
    }

    fn instruction_length(ctx: &mut DebugContext<'_>, geometry: &SourceGeometry<'_>, pc: u64) -> u64 {
        let byte = geometry.to_byte(pc);
        if ctx.translate(geometry.space(), TranslateIntent::FetchDebug, byte).is_none() {
            return geometry.min_length();
        }
        let min_length = geometry.min_length();
        ctx.disassemble(geometry.cpu, pc)
            .map_or(min_length, |dasm| dasm.advance())
    }

    /// Earliest address up to `steps` instructions before `target` whose forward
    /// disassembly lands exactly on `target`.
    fn find_pc_backwards(
        ctx: &mut DebugContext<'_>,
        geometry: &SourceGeometry<'_>,
        target: u64,
        steps: u32,
    ) -> u64 {
        let steps = u64::from(steps);
        let min_length = geometry.min_length();
        let reach = geometry.max_length().saturating_mul(steps);
        let mut current = target.saturating_sub(min_length.saturating_mul(steps));
        let mut last_good = target;
        loop {
            let mut scan = current;
            let mut count = 0;
            while scan < target {
                scan += Self::instruction_length(ctx, geometry, scan);
                count += 1;
            }
            if scan == target && count <= steps {
                last_good = current;
            }
            if target - current >= reach || current == 0 {
                break;
            }
            current = current.saturating_sub(min_length);
        }
        last_good
    }

    fn generate_bytes(
        ctx: &mut DebugContext<'_>,
        geometry: &SourceGeometry<'_>,
        start: u64,
        count: u64,
        max_chars: usize,
        decrypted: bool,
    ) -> String {
        let min_bytes = u64::from(geometry.controller.min_opcode_bytes());
        let (size, step) = AccessSize::from_bytes(u8::try_from(min_bytes).unwrap_or(0))
            .map_or((AccessSize::Byte, 1), |size| (size, min_bytes));
        let digits = 2 * usize::from(size.bytes());
        join_chunks(
            |offset| ctx.read_opcode(geometry.space(), start.wrapping_add(offset), size, decrypted),
            step,
            count,
            digits,
            max_chars,
        )
    }

    fn build_row(&self, ctx: &mut DebugContext<'_>, geometry: &SourceGeometry<'_>, total_x: u32, pc: u64) -> (DisasmRow, u64) {
        let pc = pc & geometry.info.logical_address_mask();
        let byte_address = geometry.to_byte(pc);
        let address = geometry.info.byte_to_address(byte_address);
        let mapped = ctx
            .translate(geometry.space(), TranslateIntent::FetchDebug, byte_address)
            .is_some();
        let (dasm, length) = if mapped {
            ctx.disassemble(geometry.cpu, pc).map_or_else(
                || ("<unmapped>".to_string(), geometry.min_length()),
                |dasm| {
                    let length = dasm.advance();
                    (dasm.text, length)
                },
            )
        } else {
            ("<unmapped>".to_string(), geometry.min_length())
        };

        let width = self.dasm_width as usize;
        let mut mnemonic = dasm;
        mnemonic.truncate(width);
        let mut text = format!(
            " {address:0chars$X}  {mnemonic:<width$} ",
            chars = geometry.info.logical_address_chars()
        );
        let right_width = total_x.saturating_sub(self.divider2) as usize;
        match self.right_column {
            RightColumn::Raw | RightColumn::Decrypted => {
                let count = geometry.info.address_to_byte(length);
                text.push_str(&Self::generate_bytes(
                    ctx,
                    geometry,
                    byte_address,
                    count,
                    right_width,
                    self.right_column == RightColumn::Decrypted,
                ));
            }
            RightColumn::Comments => {
                if let Some(comment) = ctx.comment_text(geometry.cpu, address) {
                    let mut comment = format!("// {comment}");
                    comment.truncate(right_width.saturating_sub(1));
                    text.push_str(&comment);
                }
            }
            RightColumn::None => {}
        }
        text.truncate(total_x as usize);
        let row = DisasmRow {
            address,
            byte_address,
            text,
        };
        (row, pc.wrapping_add(length))
    }

    fn generate(&mut self, core: &mut ViewCore, ctx: &mut DebugContext<'_>, geometry: &SourceGeometry<'_>, start: u64) {
        let chars = u32::try_from(geometry.info.logical_address_chars()).unwrap_or(16);
        self.divider1 = 1 + chars + 1;
        self.divider2 = self.divider1 + 1 + self.dasm_width + 1;
        let total_x = total_width(
            self.divider2,
            self.right_column,
            geometry.controller.min_opcode_bytes(),
            geometry.controller.max_opcode_bytes(),
        );
        self.rows.clear();
        let mut pc = start;
        for _ in 0..self.total_lines {
            let (row, next) = self.build_row(ctx, geometry, total_x, pc);
            self.rows.push(row);
            pc = next;
        }
        core.total = ViewXY::new(total_x, self.total_lines);
    }

    /// Re-disassembles row `index`; returns `true` when its text changed.
    fn refresh_row(&mut self, ctx: &mut DebugContext<'_>, geometry: &SourceGeometry<'_>, total_x: u32, index: usize) -> bool {
        let Some(address) = self.rows.get(index).map(|row| row.address) else {
            return false;
        };
        let (row, _) = self.build_row(ctx, geometry, total_x, address);
        if self.rows[index] == row {
            false
        } else {
            self.rows[index] = row;
            true
        }
    }

    fn render(&self, core: &mut ViewCore, geometry: &SourceGeometry<'_>, pc_byte: u64) {
        let breakpoints: Vec<(u64, bool)> = geometry
            .controller
            .breakpoints()
            .map(|bp| (geometry.to_byte(bp.address()), bp.is_enabled()))
            .collect();
        let visible = core.visible;
        let topleft = core.topleft;
        for y in 0..visible.y {
            let effective = topleft.y + y;
            let Some(row) = self.rows.get(effective as usize) else {
                for x in 0..visible.x {
                    if let Some(cell) = core.cell_mut(x, y) {
                        *cell = ViewChar {
                            glyph: b' ',
                            attrib: ATTR_DISABLED,
                        };
                    }
                }
                continue;
            };
            let mut attrib = ATTR_NORMAL;
            if row.byte_address == pc_byte {
                attrib |= ATTR_CURRENT;
            } else if let Some(&(_, enabled)) =
                breakpoints.iter().find(|(byte, _)| *byte == row.byte_address)
            {
                attrib |= if enabled { ATTR_CHANGED } else { ATTR_DISABLED };
            }
            if core.cursor_visible && effective == core.cursor.y {
                attrib |= ATTR_SELECTED;
            }
            let text = row.text.as_bytes();
            for x in 0..visible.x {
                let column = topleft.x + x;
                let mut cell_attrib = attrib;
                if column <= self.divider1 || column >= self.divider2 {
                    cell_attrib |= ATTR_ANCILLARY;
                }
                if column >= self.divider2 && self.right_column == RightColumn::Comments {
                    cell_attrib |= ATTR_COMMENT;
                }
                if let Some(cell) = core.cell_mut(x, y) {
                    *cell = ViewChar {
                        glyph: text.get(column as usize).copied().unwrap_or(b' '),
                        attrib: cell_attrib,
                    };
                }
            }
        }
    }
}

impl ViewBehavior for DisassemblyView {
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
        let Some(geometry) = self.geometry(core, ctx) else {
            core.fill(ViewChar::BLANK);
            return;
        };
        let pc_byte = geometry.to_byte(ctx.pc(geometry.cpu).unwrap_or(0));

        if self.expression.is_dirty() {
            self.recompute = true;
        }
        if self.expression.recompute(ctx) && !self.recompute {
            let home = geometry.to_byte(self.home_address(&geometry));
            match self.rows.iter().position(|row| row.byte_address == home) {
                Some(row) => {
                    let row = u32::try_from(row).unwrap_or(u32::MAX);
                    if row >= core.total.y.saturating_sub(core.visible.y) {
                        self.recompute = true;
                    } else if row < core.topleft.y
                        || row >= core.topleft.y + core.visible.y.saturating_sub(2)
                    {
                        core.topleft.y = row.saturating_sub(HOME_CONTEXT_ROWS);
                    }
                }
                None => self.recompute = true,
            }
        }

        let token = ctx.opcode_base_token(geometry.space());
        if token != self.last_opcode_token {
            self.last_opcode_token = token;
            self.recompute = true;
        }
        let change_count = geometry.controller.comments().change_count();
        if change_count != self.last_change_count {
            self.last_change_count = change_count;
            self.recompute = true;
        }

        if !self.recompute {
            if let Some(index) = self.rows.iter().position(|row| row.byte_address == pc_byte) {
                if self.refresh_row(ctx, &geometry, core.total.x, index) {
                    log::trace!("instruction at live pc changed, regenerating");
                    self.recompute = true;
                }
            }
        }

        if self.recompute {
            let home = self.home_address(&geometry);
            let start = Self::find_pc_backwards(ctx, &geometry, home, self.backward_steps);
            core.topleft = ViewXY::default();
            self.generate(core, ctx, &geometry, start);
            self.recompute = false;
        }

        self.render(core, &geometry, pc_byte);
    }

    fn notify(&mut self, core: &mut ViewCore, change: ViewChange) {
        match change {
            ViewChange::Cursor => {
                if core.cursor_visible && core.cursor.y < core.total.y {
                    core.adjust_visible_y_for_cursor();
                }
            }
            ViewChange::Source => {
                let device = self.source_device(core.source);
                self.expression.set_context(device);
                self.recompute = true;
            }
            ViewChange::VisibleArea => {}
        }
    }

    fn handle_key(&mut self, core: &mut ViewCore, key: ViewKey, ctx: &mut DebugContext<'_>) -> bool {
        let original = core.cursor.y;
        let last = core.total.y.saturating_sub(1);
        let page = core.visible.y.saturating_sub(PAGE_END_BUFFER);
        match key {
            ViewKey::Up => core.cursor.y = core.cursor.y.saturating_sub(1),
            ViewKey::Down => core.cursor.y = (core.cursor.y + 1).min(last),
            ViewKey::PageUp => core.cursor.y = core.cursor.y.saturating_sub(page),
            ViewKey::PageDown => core.cursor.y = core.cursor.y.saturating_add(page).min(last),
            ViewKey::Home => {
                if let Some(geometry) = self.geometry(core, ctx) {
                    let pc_byte = geometry.to_byte(ctx.pc(geometry.cpu).unwrap_or(0));
                    if let Some(row) = self.rows.iter().rposition(|row| row.byte_address == pc_byte) {
                        core.cursor.y = u32::try_from(row).unwrap_or(last);
                    }
                }
            }
            ViewKey::CtrlHome => core.cursor.y = 0,
            ViewKey::CtrlEnd => core.cursor.y = last,
            _ => {}
        }
        core.cursor.y != original
    }
}

impl DebugView<DisassemblyView> {
    /// Logical address of the cursor row.
    #[must_use]
    pub fn selected_address(&self) -> Option<u64> {
        self.behavior.row_address(self.core.cursor.y)
    }

    /// Replaces the home address expression.
    pub fn set_expression(&mut self, text: &str, ctx: &mut DebugContext<'_>) {
        self.modify(ctx, |view, _| {
            view.expression.set_text(text);
            view.recompute = true;
        });
    }

    /// Home address expression text.
    #[must_use]
    pub fn expression_text(&self) -> &str {
        self.behavior.expression_text()
    }

    /// Switches the right column.
    pub fn set_right_column(&mut self, column: RightColumn, ctx: &mut DebugContext<'_>) {
        if column != self.behavior.right_column {
            self.modify(ctx, |view, _| {
                view.right_column = column;
                view.recompute = true;
            });
        }
    }

    /// Changes how far back rows start from the home address.
    pub fn set_backward_steps(&mut self, steps: u32, ctx: &mut DebugContext<'_>) {
        if steps != self.behavior.backward_steps {
            self.modify(ctx, |view, _| {
                view.backward_steps = steps;
                view.recompute = true;
            });
        }
    }

    /// Changes the mnemonic column width.
    pub fn set_disasm_width(&mut self, width: u32, ctx: &mut DebugContext<'_>) {
        if width != self.behavior.dasm_width {
            self.modify(ctx, |view, _| {
                view.dasm_width = width;
                view.recompute = true;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{elide, join_chunks, total_width, RightColumn};

    #[rstest]
    #[case::raw_words(RightColumn::Raw, 2, 4, 20 + 1 + 8 + 1 + 1)]
    #[case::decrypted_bytes(RightColumn::Decrypted, 1, 3, 20 + 1 + 6 + 2 + 1)]
    #[case::clamped(RightColumn::Raw, 1, 32, 20 + 1 + 32 + 15 + 1)]
    #[case::comments(RightColumn::Comments, 2, 4, 20 + 1 + 50)]
    #[case::none(RightColumn::None, 2, 4, 21)]
    fn right_column_widths(
        #[case] column: RightColumn,
        #[case] min: u32,
        #[case] max: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(total_width(20, column, min, max), expected);
    }

    #[test]
    fn elision_marks_the_tail() {
        assert_eq!(elide("0102 0304".to_string(), 11, true), "0102 03...");
        assert_eq!(elide("0102".to_string(), 11, false), "0102");
    }

    #[rstest]
    #[case::fits(12, "01 02 03 04")]
    #[case::last_column_reserved(11, "01 02 0...")]
    #[case::words_only_first(3, "01")]
    fn chunk_columns_leave_the_last_column_free(#[case] max_chars: usize, #[case] expected: &str) {
        let text = join_chunks(|offset| offset + 1, 1, 4, 2, max_chars);
        assert_eq!(text, expected);
        assert!(text.len() < max_chars);
    }
}
