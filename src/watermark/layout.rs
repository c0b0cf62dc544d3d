use super::fonts::{FontRole, FontSet, FontSizes};

/// One line of watermark text tagged with the font it is set in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    pub content: String,
    pub role: FontRole,
}

impl TextLine {
    pub fn new(content: impl Into<String>, role: FontRole) -> Self {
        Self {
            content: content.into(),
            role,
        }
    }

    pub fn primary(content: impl Into<String>) -> Self {
        Self::new(content, FontRole::Primary)
    }

    pub fn secondary(content: impl Into<String>) -> Self {
        Self::new(content, FontRole::Secondary)
    }
}

/// A non-empty line together with its measured box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasuredLine {
    pub content: String,
    pub role: FontRole,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutResult {
    pub lines: Vec<MeasuredLine>,
    pub max_line_width: u32,
    pub total_block_height: u32,
    /// Vertical gap inserted between consecutive lines.
    pub line_gap: u32,
}

impl LayoutResult {
    /// True when there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn per_line_height(&self) -> Vec<u32> {
        self.lines.iter().map(|line| line.height).collect()
    }

    pub fn per_line_width(&self) -> Vec<u32> {
        self.lines.iter().map(|line| line.width).collect()
    }
}

/// Gap between lines, always derived from the primary size so mixed fonts do
/// not shift the block.
pub fn line_gap(primary_size_px: u32, line_spacing: f32) -> u32 {
    (primary_size_px as f32 * (line_spacing - 1.0)).round().max(0.0) as u32
}

/// Measure every non-empty line and the block they form.
pub fn measure(
    lines: &[TextLine],
    fonts: &FontSet,
    sizes: FontSizes,
    line_spacing: f32,
) -> LayoutResult {
    let measured: Vec<MeasuredLine> = lines
        .iter()
        .filter(|line| !line.content.is_empty())
        .map(|line| {
            let (width, height) = fonts
                .face(line.role)
                .text_size(sizes.get(line.role), &line.content);
            MeasuredLine {
                content: line.content.clone(),
                role: line.role,
                width,
                height,
            }
        })
        .collect();

    let gap = line_gap(sizes.primary, line_spacing);
    let max_line_width = measured.iter().map(|l| l.width).max().unwrap_or(0);
    let mut total_block_height: u32 = measured.iter().map(|l| l.height).sum();
    if measured.len() > 1 {
        total_block_height += (measured.len() as u32 - 1) * gap;
    }

    LayoutResult {
        lines: measured,
        max_line_width,
        total_block_height,
        line_gap: gap,
    }
}
