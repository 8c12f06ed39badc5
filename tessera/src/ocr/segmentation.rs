//! Splits a normalized image into the crops the engine sees.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::config::SegmentationConfig;

use super::types::{NormalizedImage, PixelRect, TextRegion, BACKGROUND};

/// How a normalized image is cut into regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segmentation {
    /// Components grouped into text lines.
    Lines,
    /// The whole image as a single region.
    WholeImage,
    /// Only the largest connected component.
    LargestGlyph,
    /// Every component on its own.
    Glyphs,
}

#[derive(Debug, Clone, Copy)]
struct Component {
    bounds: PixelRect,
    pixels: u32,
}

/// Produce regions in reading order. No foreground means no regions.
pub fn segment(
    normalized: &NormalizedImage,
    strategy: Segmentation,
    config: &SegmentationConfig,
) -> Vec<TextRegion> {
    if !normalized.has_foreground() {
        return Vec::new();
    }

    let rects = match strategy {
        Segmentation::WholeImage => vec![PixelRect::new(
            0,
            0,
            normalized.width(),
            normalized.height(),
        )],
        Segmentation::LargestGlyph => {
            largest_component(&find_components(&normalized.image, config.min_component_area))
                .map(|c| vec![c.bounds])
                .unwrap_or_default()
        }
        Segmentation::Glyphs => {
            let components = find_components(&normalized.image, config.min_component_area);
            let glyphs = merge_diacritics(components.iter().map(|c| c.bounds).collect());
            reading_order(glyphs)
        }
        Segmentation::Lines => {
            let components = find_components(&normalized.image, config.min_component_area);
            let glyphs = merge_diacritics(components.iter().map(|c| c.bounds).collect());
            reading_order(group_lines(glyphs, config.line_gap_factor))
        }
    };

    let padding = if strategy == Segmentation::WholeImage {
        0
    } else {
        config.region_padding
    };

    let regions: Vec<TextRegion> = rects
        .into_iter()
        .enumerate()
        .map(|(ordinal, rect)| build_region(normalized, ordinal, rect, padding))
        .collect();

    tracing::debug!(
        strategy = ?strategy,
        regions = regions.len(),
        "Image segmented"
    );

    regions
}

fn build_region(
    normalized: &NormalizedImage,
    ordinal: usize,
    rect: PixelRect,
    padding: u32,
) -> TextRegion {
    let bounds = rect.padded(padding, normalized.width(), normalized.height());
    let image = crop_with_background(&normalized.image, &rect, &bounds);

    TextRegion {
        ordinal,
        bounds,
        image,
        polygon: normalized.transform.rect_to_polygon(&rect),
    }
}

/// Crop `bounds`, keeping only pixels inside `content`. Padding is background
/// even when it overlaps neighbouring ink.
fn crop_with_background(image: &GrayImage, content: &PixelRect, bounds: &PixelRect) -> GrayImage {
    GrayImage::from_fn(bounds.width(), bounds.height(), |x, y| {
        let (ix, iy) = (bounds.left + x, bounds.top + y);
        let inside = ix >= content.left
            && ix < content.right
            && iy >= content.top
            && iy < content.bottom;
        if inside {
            *image.get_pixel(ix, iy)
        } else {
            Luma([BACKGROUND])
        }
    })
}

/// 8-connected foreground components at least `min_area` pixels large,
/// in label order.
fn find_components(image: &GrayImage, min_area: u32) -> Vec<Component> {
    let labels = connected_components(image, Connectivity::Eight, Luma([BACKGROUND]));

    let mut components: Vec<Option<Component>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if components.len() < label {
            components.resize(label, None);
        }
        let pixel = PixelRect::new(x, y, 1, 1);
        let slot = &mut components[label - 1];
        *slot = Some(match slot.take() {
            Some(c) => Component {
                bounds: c.bounds.union(&pixel),
                pixels: c.pixels + 1,
            },
            None => Component {
                bounds: pixel,
                pixels: 1,
            },
        });
    }

    components
        .into_iter()
        .flatten()
        .filter(|c| c.pixels >= min_area.max(1))
        .collect()
}

/// Largest by pixel count; the earliest label wins ties.
fn largest_component(components: &[Component]) -> Option<Component> {
    components.iter().fold(None, |best: Option<Component>, c| match best {
        Some(b) if b.pixels >= c.pixels => Some(b),
        _ => Some(*c),
    })
}

/// Attach small marks (dots, accents) to the glyph directly below or above them.
fn merge_diacritics(mut rects: Vec<PixelRect>) -> Vec<PixelRect> {
    rects.sort_by_key(|r| std::cmp::Reverse(r.area()));

    let mut merged: Vec<PixelRect> = Vec::with_capacity(rects.len());
    for rect in rects {
        let host = merged.iter_mut().find(|m| {
            m.horizontal_gap(&rect) == 0
                && rect.height() * 2 <= m.height()
                && m.vertical_gap(&rect) * 2 <= m.height()
                && m.vertical_overlap(&rect) == 0
        });
        match host {
            Some(m) => *m = m.union(&rect),
            None => merged.push(rect),
        }
    }
    merged
}

fn same_line(a: &PixelRect, b: &PixelRect, gap_factor: f32) -> bool {
    let min_height = a.height().min(b.height());
    let max_height = a.height().max(b.height());
    a.vertical_overlap(b) * 2 >= min_height
        && a.horizontal_gap(b) as f32 <= gap_factor * max_height as f32
}

/// Merge glyph boxes into line boxes until no two boxes belong together.
fn group_lines(glyphs: Vec<PixelRect>, gap_factor: f32) -> Vec<PixelRect> {
    let mut lines = glyphs;
    lines.sort_by_key(|r| (r.left, r.top));

    loop {
        let mut merged: Vec<PixelRect> = Vec::with_capacity(lines.len());
        let mut changed = false;
        for rect in lines {
            match merged.iter_mut().find(|l| same_line(l, &rect, gap_factor)) {
                Some(line) => {
                    *line = line.union(&rect);
                    changed = true;
                }
                None => merged.push(rect),
            }
        }
        lines = merged;
        if !changed {
            return lines;
        }
    }
}

/// Top-to-bottom rows, left-to-right within a row.
fn reading_order(mut rects: Vec<PixelRect>) -> Vec<PixelRect> {
    rects.sort_by(|a, b| {
        a.center_y()
            .total_cmp(&b.center_y())
            .then(a.left.cmp(&b.left))
    });

    let mut rows: Vec<Vec<PixelRect>> = Vec::new();
    for rect in rects {
        let current = rows.last_mut().filter(|row| {
            let anchor = row[0];
            (rect.center_y() - anchor.center_y()).abs()
                <= anchor.height().max(rect.height()) as f32 / 2.0
        });
        if let Some(row) = current {
            row.push(rect);
        } else {
            rows.push(vec![rect]);
        }
    }

    rows.into_iter()
        .flat_map(|mut row| {
            row.sort_by_key(|r| (r.left, r.top));
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::types::{CoordinateTransform, FOREGROUND};

    fn blank(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([BACKGROUND]))
    }

    fn fill(img: &mut GrayImage, rect: PixelRect) {
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                img.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
    }

    fn normalized(image: GrayImage) -> NormalizedImage {
        let transform = CoordinateTransform::identity(image.width(), image.height());
        NormalizedImage {
            image,
            skew_angle: 0.0,
            transform,
        }
    }

    /// Two lines of three 10x14 "glyphs" each.
    fn two_line_page() -> NormalizedImage {
        let mut img = blank(200, 100);
        for row in 0..2 {
            for col in 0..3 {
                fill(&mut img, PixelRect::new(20 + col * 16, 20 + row * 40, 10, 14));
            }
        }
        normalized(img)
    }

    #[test]
    fn test_blank_image_yields_no_regions() {
        let page = normalized(blank(100, 50));
        for strategy in [
            Segmentation::Lines,
            Segmentation::WholeImage,
            Segmentation::LargestGlyph,
            Segmentation::Glyphs,
        ] {
            assert!(segment(&page, strategy, &SegmentationConfig::default()).is_empty());
        }
    }

    #[test]
    fn test_lines_are_grouped_and_ordered() {
        let regions = segment(
            &two_line_page(),
            Segmentation::Lines,
            &SegmentationConfig::default(),
        );
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].ordinal, 0);
        assert!(regions[0].bounds.top < regions[1].bounds.top);
        // Tight polygon spans all three glyphs of the first line.
        assert_eq!(regions[0].polygon[0], [20.0, 20.0]);
        assert_eq!(regions[0].polygon[2], [62.0, 34.0]);
    }

    #[test]
    fn test_distant_words_on_same_row_stay_separate() {
        let mut img = blank(300, 60);
        fill(&mut img, PixelRect::new(10, 20, 10, 14));
        fill(&mut img, PixelRect::new(200, 20, 10, 14));
        let regions = segment(&normalized(img), Segmentation::Lines, &SegmentationConfig::default());
        assert_eq!(regions.len(), 2);
        assert!(regions[0].bounds.left < regions[1].bounds.left);
    }

    #[test]
    fn test_whole_image_is_single_region() {
        let regions = segment(
            &two_line_page(),
            Segmentation::WholeImage,
            &SegmentationConfig::default(),
        );
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounds, PixelRect::new(0, 0, 200, 100));
        assert_eq!(regions[0].image.dimensions(), (200, 100));
    }

    #[test]
    fn test_largest_glyph_is_isolated() {
        let mut img = blank(100, 60);
        fill(&mut img, PixelRect::new(10, 10, 5, 5));
        fill(&mut img, PixelRect::new(40, 10, 20, 30));
        let regions = segment(
            &normalized(img),
            Segmentation::LargestGlyph,
            &SegmentationConfig::default(),
        );
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].polygon[0], [40.0, 10.0]);
        assert_eq!(regions[0].polygon[2], [60.0, 40.0]);
    }

    #[test]
    fn test_glyphs_are_split_in_reading_order() {
        let regions = segment(
            &two_line_page(),
            Segmentation::Glyphs,
            &SegmentationConfig::default(),
        );
        assert_eq!(regions.len(), 6);
        let lefts: Vec<f32> = regions.iter().map(|r| r.polygon[0][0]).collect();
        assert_eq!(lefts, vec![20.0, 36.0, 52.0, 20.0, 36.0, 52.0]);
    }

    #[test]
    fn test_dot_is_merged_into_its_glyph() {
        let mut img = blank(60, 60);
        fill(&mut img, PixelRect::new(20, 25, 4, 20));
        fill(&mut img, PixelRect::new(20, 18, 4, 4));
        let regions = segment(&normalized(img), Segmentation::Glyphs, &SegmentationConfig::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].polygon[0], [20.0, 18.0]);
    }

    #[test]
    fn test_specks_below_min_area_are_ignored() {
        let mut img = blank(60, 60);
        img.put_pixel(5, 5, Luma([FOREGROUND]));
        fill(&mut img, PixelRect::new(20, 20, 10, 10));
        let regions = segment(&normalized(img), Segmentation::Glyphs, &SegmentationConfig::default());
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn test_crop_padding_is_background() {
        let mut img = blank(60, 60);
        fill(&mut img, PixelRect::new(20, 20, 10, 10));
        fill(&mut img, PixelRect::new(32, 20, 2, 2));
        let config = SegmentationConfig {
            min_component_area: 1,
            ..SegmentationConfig::default()
        };
        let regions = segment(&normalized(img), Segmentation::LargestGlyph, &config);
        let region = &regions[0];
        assert_eq!(region.bounds, PixelRect::new(16, 16, 18, 18));
        // (32, 20) belongs to the neighbouring speck and must be blanked.
        assert_eq!(region.image.get_pixel(32 - 16, 20 - 16)[0], BACKGROUND);
        assert_eq!(region.image.get_pixel(25 - 16, 25 - 16)[0], FOREGROUND);
    }
}
