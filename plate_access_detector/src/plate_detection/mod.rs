pub mod access_gate;
pub mod bounding_box_render;
pub mod dnn_ocr;
pub mod object_detector;
pub mod video_reader;

use opencv::core::Rect;
use plate_access::Region;

pub fn to_rect(region: &Region) -> Rect {
    Rect::new(region.x, region.y, region.width, region.height)
}

pub fn to_region(rect: &Rect) -> Region {
    Region::new(rect.x, rect.y, rect.width, rect.height)
}
