mod blob;
mod wkb;
mod wkt;

pub use blob::{decode_blob, encode_blob, is_geometry_blob, read_header, BlobHeader};
pub use wkb::{read_wkb, write_wkb};
pub use wkt::{parse_wkt, to_wkt};
