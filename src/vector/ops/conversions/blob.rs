//! Geometry blob carried through SQL expressions.
//!
//! | offset | size | content                                 |
//! |--------|------|-----------------------------------------|
//! | 0      | 1    | `0x00` start marker                     |
//! | 1      | 1    | byte order, `0x01` little endian        |
//! | 2      | 4    | srid                                    |
//! | 6      | 32   | mbr: min x, min y, max x, max y         |
//! | 38     | 1    | `0x7C` end of mbr                       |
//! | 39     | n    | WKB of the geometry without its first byte |
//! | 39 + n | 1    | `0xFE` end marker                       |

use geo_types::{Geometry, Rect};

use super::wkb::{read_wkb, write_wkb};
use crate::errors::{Result, VirtualLayerError};
use crate::vector::ops::envelope;
use crate::vector::GeometryType;

const HEADER_LEN: usize = 39;
const MBR_END: u8 = 0x7C;
const BLOB_END: u8 = 0xFE;

/// Encodes `geometry` into the blob format.
pub fn encode_blob(geometry: &Geometry<f64>, srid: i32) -> Vec<u8> {
    let mut wkb = Vec::new();
    write_wkb(geometry, &mut wkb);

    let mbr = envelope(geometry).unwrap_or_else(|| Rect::new((0., 0.), (0., 0.)));
    let mut blob = Vec::with_capacity(HEADER_LEN + wkb.len());
    blob.push(0x00);
    blob.push(0x01);
    blob.extend_from_slice(&srid.to_le_bytes());
    for v in [mbr.min().x, mbr.min().y, mbr.max().x, mbr.max().y] {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob.push(MBR_END);
    blob.extend_from_slice(&wkb[1..]);
    blob.push(BLOB_END);
    blob
}

/// Fixed-size part of a blob, readable without decoding the geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlobHeader {
    pub srid: i32,
    pub mbr: Rect<f64>,
    pub geometry_type: GeometryType,
}

fn invalid(msg: &str) -> VirtualLayerError {
    VirtualLayerError::InvalidGeometryBlob(msg.to_string())
}

/// Reads and validates the blob header.
pub fn read_header(blob: &[u8]) -> Result<BlobHeader> {
    if blob.len() < HEADER_LEN + 5 {
        return Err(invalid("blob too short"));
    }
    if blob[0] != 0x00 || blob[38] != MBR_END || blob[blob.len() - 1] != BLOB_END {
        return Err(invalid("missing blob markers"));
    }
    let le = match blob[1] {
        0x00 => false,
        0x01 => true,
        _ => return Err(invalid("invalid byte order")),
    };
    let word = |at: usize| {
        let mut b = [0u8; 4];
        b.copy_from_slice(&blob[at..at + 4]);
        if le {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        }
    };
    let double = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&blob[at..at + 8]);
        if le {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        }
    };
    let geometry_type = GeometryType::from_wkb_code(word(HEADER_LEN) % 1000)
        .ok_or_else(|| invalid("unsupported geometry type"))?;
    Ok(BlobHeader {
        srid: word(2) as i32,
        mbr: Rect::new((double(6), double(14)), (double(22), double(30))),
        geometry_type,
    })
}

/// Whether `blob` looks like an encoded geometry.
pub fn is_geometry_blob(blob: &[u8]) -> bool {
    read_header(blob).is_ok()
}

/// Decodes a blob back into a geometry; empty geometries decode to `None`.
pub fn decode_blob(blob: &[u8]) -> Result<Option<Geometry<f64>>> {
    read_header(blob)?;
    let mut wkb = Vec::with_capacity(blob.len() - HEADER_LEN);
    wkb.push(blob[1]);
    wkb.extend_from_slice(&blob[HEADER_LEN..blob.len() - 1]);
    read_wkb(&wkb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_near;
    use geo_types::{line_string, point};

    #[test]
    fn test_header_layout() {
        let geom = Geometry::LineString(line_string![(x: 1.0, y: 5.0), (x: 3.0, y: -2.0)]);
        let blob = encode_blob(&geom, 4326);
        assert_eq!(blob[0], 0x00);
        assert_eq!(blob[38], 0x7C);
        assert_eq!(*blob.last().unwrap(), 0xFE);
        // header + type + count + 2 coordinates + end marker
        assert_eq!(blob.len(), 39 + 4 + 4 + 32 + 1);

        let header = read_header(&blob).unwrap();
        assert_eq!(header.srid, 4326);
        assert_eq!(header.geometry_type, GeometryType::LineString);
        assert_near!(header.mbr.min().x, 1.0);
        assert_near!(header.mbr.min().y, -2.0);
        assert_near!(header.mbr.max().x, 3.0);
        assert_near!(header.mbr.max().y, 5.0);

        assert_eq!(decode_blob(&blob).unwrap(), Some(geom));
    }

    #[test]
    fn test_rejects_foreign_blobs() {
        assert!(!is_geometry_blob(b"hello"));
        let mut blob = encode_blob(&Geometry::Point(point!(x: 0.0, y: 0.0)), 0);
        blob.pop();
        assert!(!is_geometry_blob(&blob));
        assert!(decode_blob(&blob).is_err());
    }
}
