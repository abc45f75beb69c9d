use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::model::{Frame, HeaderMetadata};
use crate::error::{Result, SifError};

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Cut the payload into frames of little-endian `f32` samples.
///
/// Bytes beyond the declared frame count are ignored. A payload that is too
/// short yields [`SifError::TruncatedPayload`] carrying every complete frame.
pub fn extract_frames(header: &HeaderMetadata, payload: &[u8]) -> Result<Vec<Frame>> {
    let width = header.frame_width();
    let height = header.frame_height();
    let expected_frames = header.number_of_frames();

    let frame_bytes = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(SAMPLE_BYTES))
        .filter(|&n| n > 0)
        .ok_or_else(|| SifError::malformed(format!("unusable frame geometry {width}x{height}")))?;
    let expected_bytes = frame_bytes
        .checked_mul(expected_frames)
        .ok_or_else(|| SifError::malformed(format!("{expected_frames} frames overflow the payload size")))?;

    let frames: Vec<Frame> = payload
        .chunks_exact(frame_bytes)
        .take(expected_frames)
        .map(|chunk| {
            let mut data = vec![0f32; width * height];
            LittleEndian::read_f32_into(chunk, &mut data);
            Frame { width, height, data }
        })
        .collect();

    if frames.len() < expected_frames {
        return Err(SifError::TruncatedPayload {
            expected_frames,
            expected_bytes,
            available_bytes: payload.len(),
            partial: frames,
        });
    }
    Ok(frames)
}

// ---------------------------------------------------------------------------
// Reduction – collapsing a 2-D frame onto one axis
// ---------------------------------------------------------------------------

/// Which axis of a frame is summed away to produce a 1-D spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    /// Sum down each column; the spectrum runs along the frame width.
    #[serde(rename = "rows")]
    SumRows,
    /// Sum across each row; the spectrum runs along the frame height.
    #[serde(rename = "columns")]
    SumColumns,
}

impl FromStr for Reduction {
    type Err = SifError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rows" => Ok(Reduction::SumRows),
            "columns" | "cols" => Ok(Reduction::SumColumns),
            other => Err(SifError::InvalidConfig(format!(
                "unknown reduction '{other}' (expected rows or columns)"
            ))),
        }
    }
}

impl Frame {
    /// The only unambiguous reduction, if the frame is a single row or column.
    pub fn inferred_reduction(&self) -> Option<Reduction> {
        if self.height == 1 {
            Some(Reduction::SumRows)
        } else if self.width == 1 {
            Some(Reduction::SumColumns)
        } else {
            None
        }
    }

    pub fn reduce(&self, reduction: Reduction) -> Vec<f64> {
        match reduction {
            Reduction::SumRows => {
                let mut out = vec![0.0; self.width];
                for row in self.data.chunks_exact(self.width) {
                    for (acc, &v) in out.iter_mut().zip(row) {
                        *acc += f64::from(v);
                    }
                }
                out
            }
            Reduction::SumColumns => self
                .data
                .chunks_exact(self.width)
                .map(|row| row.iter().map(|&v| f64::from(v)).sum())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixture::SifWriter;
    use crate::data::header::decode_header;
    use crate::data::raw::RawDocument;

    fn split(bytes: &[u8]) -> (HeaderMetadata, &[u8]) {
        let header = decode_header(&mut RawDocument::new(bytes)).unwrap();
        let payload = &bytes[header.payload_offset..];
        (header, payload)
    }

    #[test]
    fn decodes_little_endian_frames_in_order() {
        let bytes = SifWriter::new(3, 1)
            .frame(vec![1.0, 2.0, 3.0])
            .frame(vec![-1.5, 0.0, 1e6])
            .to_bytes();
        let (header, payload) = split(&bytes);
        let frames = extract_frames(&header, payload).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, vec![1.0, 2.0, 3.0]);
        assert_eq!(frames[1].data, vec![-1.5, 0.0, 1e6]);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let bytes = SifWriter::new(2, 1)
            .frame(vec![4.0, 5.0])
            .trailing_padding(7)
            .to_bytes();
        let (header, payload) = split(&bytes);
        let frames = extract_frames(&header, payload).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![4.0, 5.0]);
    }

    #[test]
    fn short_payload_keeps_complete_frames() {
        let bytes = SifWriter::new(2, 1)
            .frame(vec![1.0, 2.0])
            .frame(vec![3.0, 4.0])
            .frame(vec![5.0, 6.0])
            .to_bytes();
        let cut = &bytes[..bytes.len() - 6];
        let (header, payload) = split(cut);
        match extract_frames(&header, payload) {
            Err(SifError::TruncatedPayload {
                expected_frames,
                expected_bytes,
                available_bytes,
                partial,
            }) => {
                assert_eq!(expected_frames, 3);
                assert_eq!(expected_bytes, 24);
                assert_eq!(available_bytes, 18);
                assert_eq!(partial.len(), 2);
                assert_eq!(partial[1].data, vec![3.0, 4.0]);
            }
            other => panic!("expected TruncatedPayload, got {other:?}"),
        }
    }

    #[test]
    fn samples_land_at_row_and_column() {
        let samples: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let bytes = SifWriter::new(4, 3).frame(samples).to_bytes();
        let (header, payload) = split(&bytes);
        let frame = &extract_frames(&header, payload).unwrap()[0];
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.get(0, 3), Some(3.0));
        assert_eq!(frame.get(2, 1), Some(9.0));
        assert_eq!(frame.row(1), Some(&[4.0, 5.0, 6.0, 7.0][..]));
    }

    #[test]
    fn one_missing_byte_truncates_the_last_frame() {
        let bytes = SifWriter::new(2, 1).frame(vec![1.0, 2.0]).to_bytes();
        let (header, payload) = split(&bytes[..bytes.len() - 1]);
        let err = extract_frames(&header, payload).unwrap_err();
        assert!(matches!(err, SifError::TruncatedPayload { .. }));
        assert_eq!(err.partial_frames().map(|f| f.len()), Some(0));
    }

    #[test]
    fn reductions_sum_the_right_axis() {
        let frame = Frame {
            width: 3,
            height: 2,
            data: vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0],
        };
        assert_eq!(frame.inferred_reduction(), None);
        assert_eq!(frame.reduce(Reduction::SumRows), vec![11.0, 22.0, 33.0]);
        assert_eq!(frame.reduce(Reduction::SumColumns), vec![6.0, 60.0]);
    }

    #[test]
    fn single_row_or_column_infers_reduction() {
        let row = Frame {
            width: 4,
            height: 1,
            data: vec![0.0; 4],
        };
        let column = Frame {
            width: 1,
            height: 4,
            data: vec![0.0; 4],
        };
        assert_eq!(row.inferred_reduction(), Some(Reduction::SumRows));
        assert_eq!(column.inferred_reduction(), Some(Reduction::SumColumns));
        assert_eq!(column.reduce(Reduction::SumColumns).len(), 4);
    }

    #[test]
    fn reduction_parses_from_config_strings() {
        assert_eq!("rows".parse::<Reduction>().unwrap(), Reduction::SumRows);
        assert_eq!("Columns".parse::<Reduction>().unwrap(), Reduction::SumColumns);
        assert!("diagonal".parse::<Reduction>().is_err());
    }
}
