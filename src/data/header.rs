use std::ops::RangeInclusive;
use std::str::FromStr;

use log::debug;

use super::model::{
    AcquisitionInfo, Area, AxisLabels, CalibrationInfo, DetectorInfo, FrameGeometry,
    HeaderMetadata, SubImage,
};
use super::raw::RawDocument;
use crate::error::{Result, SifError};

/// Marker every Andor multi-channel file starts with.
pub const MAGIC: &[u8] = b"Andor Technology Multi-Channel File\n";

/// Format versions the record layout below is known for.
pub const SUPPORTED_VERSIONS: RangeInclusive<u32> = 65548..=65567;

/// Calibration version whose coefficients sit on their own line.
pub(crate) const POLYNOMIAL_CALIBRATION: u32 = 65540;

/// Newest layout: a `1` flag followed by one extra line per frame before the payload.
pub(crate) const EXTENDED_TIMESTAMPS: u32 = 65567;

pub(crate) const FRAME_CALIBRATION_PREFIX: &[u8] = b"Calibration data for";

const ACQUISITION_FIELDS: usize = 36;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Decode the header records in their fixed order, leaving the cursor at the
/// first payload byte (also recorded as `payload_offset`).
pub fn decode_header(doc: &mut RawDocument<'_>) -> Result<HeaderMetadata> {
    decode_preamble(doc)?;
    let (sif_version, acquisition) = decode_acquisition(doc)?;
    let (detector, user_text) = decode_detector(doc)?;
    let spectrograph = decode_spectrograph(doc, sif_version)?;
    let mut calibration = decode_calibration(doc, spectrograph.as_deref())?;
    let axes = decode_axes(doc)?;
    let geometry = decode_geometry(doc)?;
    let timestamps = decode_timestamps(doc, geometry.number_of_frames)?;
    let payload_offset = locate_payload(doc, sif_version, geometry.number_of_frames);

    if let Some(per_frame) = decode_frame_calibration(user_text, geometry.number_of_frames)? {
        calibration.frame_coefficients = per_frame;
        calibration.coefficients.clear();
    }

    debug!(
        "sif v{sif_version}: {} frame(s) of {}x{}, {} calibration term(s), payload at byte {payload_offset}",
        geometry.number_of_frames,
        geometry.frame_width,
        geometry.frame_height,
        calibration.coefficients.len(),
    );

    Ok(HeaderMetadata {
        sif_version,
        acquisition,
        detector,
        spectrograph,
        calibration,
        axes,
        geometry,
        timestamps,
        payload_offset,
    })
}

/// Lines skipped before the spectrograph name, whether a name line follows,
/// and lines skipped after it.
pub(crate) fn spectrograph_layout(version: u32) -> (usize, bool, usize) {
    match version {
        65548..=65557 => (2, false, 0),
        65558 => (5, false, 0),
        65559 | 65564 => (8, true, 0),
        65565 => (15, false, 0),
        v if v > 65565 => (8, true, 9),
        _ => (0, false, 0),
    }
}

// ---------------------------------------------------------------------------
// Field and line cursors
// ---------------------------------------------------------------------------

/// Space-separated fields of one header line, counted against what the record needs.
struct Fields<'a> {
    record: &'static str,
    expected: usize,
    found: usize,
    line: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(record: &'static str, expected: usize, line: &'a [u8]) -> Self {
        Fields {
            record,
            expected,
            found: 0,
            line,
            pos: 0,
        }
    }

    fn truncated(&self) -> SifError {
        SifError::TruncatedHeader {
            record: self.record,
            expected: self.expected,
            actual: self.found,
        }
    }

    fn skip_spaces(&mut self) {
        while self.line.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
    }

    fn has_more(&mut self) -> bool {
        self.skip_spaces();
        self.pos < self.line.len()
    }

    /// Next token; consumes the single space that terminates it.
    fn token(&mut self) -> Result<&'a [u8]> {
        self.skip_spaces();
        let start = self.pos;
        while self.line.get(self.pos).is_some_and(|&b| b != b' ') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.truncated());
        }
        let token = &self.line[start..self.pos];
        if self.pos < self.line.len() {
            self.pos += 1;
        }
        self.found += 1;
        Ok(token)
    }

    fn parse<T: FromStr>(&mut self, field: &'static str) -> Result<T> {
        let token = self.token()?;
        parse_token(field, token)
    }

    fn skip_fields(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            self.token()?;
        }
        Ok(())
    }

    /// Skip raw bytes that are not space separated (padding, NUL markers).
    fn skip_bytes(&mut self, n: usize) -> Result<()> {
        if self.pos + n > self.line.len() {
            return Err(self.truncated());
        }
        self.pos += n;
        Ok(())
    }

    fn rest(&self) -> &'a [u8] {
        &self.line[self.pos..]
    }
}

/// Whole lines belonging to one record.
struct Lines {
    record: &'static str,
    expected: usize,
    found: usize,
}

impl Lines {
    fn new(record: &'static str, expected: usize) -> Self {
        Lines {
            record,
            expected,
            found: 0,
        }
    }

    fn truncated(&self) -> SifError {
        SifError::TruncatedHeader {
            record: self.record,
            expected: self.expected,
            actual: self.found,
        }
    }

    fn next<'a>(&mut self, doc: &mut RawDocument<'a>) -> Result<&'a [u8]> {
        let line = doc.read_line().ok_or_else(|| self.truncated())?;
        self.found += 1;
        Ok(line)
    }

    fn skip(&mut self, doc: &mut RawDocument<'_>, n: usize) -> Result<()> {
        for _ in 0..n {
            self.next(doc)?;
        }
        Ok(())
    }
}

pub(crate) fn parse_token<T: FromStr>(field: &'static str, token: &[u8]) -> Result<T> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| SifError::FieldParseError {
            field,
            token: String::from_utf8_lossy(token).into_owned(),
        })
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// A length either trailing on the current line or alone on the next one.
fn length_field(
    fields: &mut Fields<'_>,
    doc: &mut RawDocument<'_>,
    field: &'static str,
) -> Result<usize> {
    if fields.has_more() {
        return fields.parse(field);
    }
    let line = doc.read_line().ok_or_else(|| fields.truncated())?;
    fields.found += 1;
    parse_token(field, line)
}

// ---------------------------------------------------------------------------
// Record decoders, in file order
// ---------------------------------------------------------------------------

fn decode_preamble(doc: &mut RawDocument<'_>) -> Result<()> {
    match doc.take(MAGIC.len()) {
        Some(marker) if marker == MAGIC => {}
        _ => return Err(SifError::malformed("not an Andor multi-channel file")),
    }
    Lines::new("preamble", 1).next(doc)?;
    Ok(())
}

fn decode_acquisition(doc: &mut RawDocument<'_>) -> Result<(u32, AcquisitionInfo)> {
    let line = Lines::new("acquisition", ACQUISITION_FIELDS).next(doc)?;
    let mut f = Fields::new("acquisition", ACQUISITION_FIELDS, line);

    let version_token = f.token()?;
    let version: u32 = parse_token("sif version", version_token).map_err(|_| {
        SifError::malformed(format!("unreadable version {:?}", lossy(version_token)))
    })?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(SifError::malformed(format!("unsupported sif version {version}")));
    }

    f.skip_fields(3)?;
    let experiment_time = f.parse("experiment time")?;
    let detector_temperature = f.parse("detector temperature")?;
    f.skip_bytes(10)?;
    f.skip_fields(1)?;
    let exposure_time = f.parse("exposure time")?;
    let cycle_time = f.parse("cycle time")?;
    let accumulated_cycle_time = f.parse("accumulated cycle time")?;
    let accumulated_cycles = f.parse("accumulated cycles")?;
    // NUL, space
    f.skip_bytes(2)?;
    let stack_cycle_time = f.parse("stack cycle time")?;
    let pixel_readout_time = f.parse("pixel readout time")?;
    f.skip_fields(2)?;
    let gain_dac = f.parse("gain DAC")?;
    f.skip_fields(2)?;
    let gate_width = f.parse("gate width")?;
    f.skip_fields(16)?;
    let grating_blaze = f.parse("grating blaze")?;

    Ok((
        version,
        AcquisitionInfo {
            experiment_time,
            detector_temperature,
            exposure_time,
            cycle_time,
            accumulated_cycle_time,
            accumulated_cycles,
            stack_cycle_time,
            pixel_readout_time,
            gain_dac,
            gate_width,
            grating_blaze,
        },
    ))
}

/// Detector block: type, sensor size and file name, the user text, and the
/// shutter timing line. The raw user text is returned for later inspection.
fn decode_detector<'a>(doc: &mut RawDocument<'a>) -> Result<(DetectorInfo, &'a [u8])> {
    let mut lines = Lines::new("detector", 3);
    let detector_type = lossy(lines.next(doc)?);

    let mut f = Fields::new("detector", 3, lines.next(doc)?);
    let width = f.parse("detector width")?;
    let height = f.parse("detector height")?;
    let name_len = length_field(&mut f, doc, "original filename length")?;
    let name = doc.take(name_len).ok_or_else(|| f.truncated())?;
    lines.next(doc)?;

    let mut f = Fields::new("user text", 2, Lines::new("user text", 2).next(doc)?);
    f.skip_fields(1)?;
    let text_len = length_field(&mut f, doc, "user text length")?;
    let user_text = doc.take(text_len).ok_or_else(|| f.truncated())?;
    doc.take(1).ok_or_else(|| f.truncated())?;

    let mut f = Fields::new("shutter", 3, Lines::new("shutter", 3).next(doc)?);
    f.skip_fields(1)?;
    f.skip_bytes(8)?;
    let shutter_time = (f.parse("shutter open time")?, f.parse("shutter close time")?);

    Ok((
        DetectorInfo {
            detector_type,
            width,
            height,
            original_filename: lossy(name),
            shutter_time,
        },
        user_text,
    ))
}

fn decode_spectrograph(doc: &mut RawDocument<'_>, version: u32) -> Result<Option<String>> {
    let (before, named, after) = spectrograph_layout(version);
    let mut lines = Lines::new("spectrograph", before + usize::from(named) + after);
    lines.skip(doc, before)?;
    let name = if named {
        let mut f = Fields::new("spectrograph", 2, lines.next(doc)?);
        f.skip_fields(1)?;
        Some(lossy(f.token()?))
    } else {
        None
    };
    lines.skip(doc, after)?;
    Ok(name)
}

fn decode_calibration(doc: &mut RawDocument<'_>, spectrograph: Option<&str>) -> Result<CalibrationInfo> {
    let mut lines = Lines::new("calibration", 7);
    let mut f = Fields::new("calibration", 1, lines.next(doc)?);
    let version = f.parse("calibration version")?;

    let coefficient_line = if version == POLYNOMIAL_CALIBRATION {
        lines.expected += 1;
        lines.next(doc)?
    } else {
        f.rest()
    };
    let strict = version == POLYNOMIAL_CALIBRATION
        || spectrograph.is_some_and(|name| name.contains("Mechelle"));
    let coefficients = parse_coefficients(coefficient_line, strict)?;

    lines.skip(doc, 2)?;
    let raman_excitation = parse_token::<f64>("raman excitation", lines.next(doc)?)
        .ok()
        .filter(|v| v.is_finite());
    lines.skip(doc, 3)?;

    Ok(CalibrationInfo {
        version,
        coefficients,
        frame_coefficients: Vec::new(),
        raman_excitation,
    })
}

/// Polynomial terms in ascending order. Outside the polynomial layouts the line
/// is opaque binary, and anything unparsable there just means "uncalibrated".
fn parse_coefficients(line: &[u8], strict: bool) -> Result<Vec<f64>> {
    let parsed: Result<Vec<f64>> = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|tok| !tok.is_empty())
        .map(|tok| parse_token("calibration coefficient", tok))
        .collect();
    match parsed {
        Ok(coefficients) => Ok(coefficients),
        Err(e) if strict => Err(e),
        Err(_) => Ok(Vec::new()),
    }
}

fn decode_axes(doc: &mut RawDocument<'_>) -> Result<AxisLabels> {
    let mut lines = Lines::new("axes", 3);
    let mut counted = |field: &'static str| -> Result<String> {
        let len: usize = parse_token(field, lines.next(doc)?)?;
        let text = doc.take(len).ok_or_else(|| SifError::TruncatedHeader {
            record: "axes",
            expected: 3,
            actual: lines.found - 1,
        })?;
        Ok(lossy(text))
    };
    Ok(AxisLabels {
        frame_axis: counted("frame axis")?,
        data_type: counted("data type")?,
        image_axis: counted("image axis")?,
    })
}

fn decode_geometry(doc: &mut RawDocument<'_>) -> Result<FrameGeometry> {
    let mut f = Fields::new("image area", 9, Lines::new("image area", 1).next(doc)?);
    f.skip_fields(1)?;
    let image_area = Area {
        x0: f.parse("image x0")?,
        y1: f.parse("image y1")?,
        x1: f.parse("image x1")?,
        y0: f.parse("image y0")?,
    };
    let number_of_frames = f.parse("number of frames")?;
    let sub_image_count: usize = f.parse("number of sub-images")?;
    let total_length = f.parse("total length")?;
    let image_length = f.parse("image length")?;

    if sub_image_count == 0 {
        return Err(SifError::malformed("header declares no sub-images"));
    }
    let sub_images = (0..sub_image_count)
        .map(|_| decode_sub_image(doc))
        .collect::<Result<Vec<_>>>()?;

    let frame_width = sub_images[0].width;
    if let Some(odd) = sub_images.iter().find(|s| s.width != frame_width) {
        return Err(SifError::malformed(format!(
            "sub-images differ in width ({frame_width} vs {})",
            odd.width
        )));
    }
    let frame_height = sub_images
        .iter()
        .try_fold(0usize, |total, s| total.checked_add(s.height))
        .ok_or_else(|| SifError::malformed("sub-image heights overflow"))?;

    Ok(FrameGeometry {
        image_area,
        number_of_frames,
        sub_images,
        total_length,
        image_length,
        frame_width,
        frame_height,
    })
}

fn decode_sub_image(doc: &mut RawDocument<'_>) -> Result<SubImage> {
    let mut f = Fields::new("sub-image", 7, Lines::new("sub-image", 1).next(doc)?);
    f.skip_fields(1)?;
    let area = Area {
        x0: f.parse("sub-image x0")?,
        y1: f.parse("sub-image y1")?,
        x1: f.parse("sub-image x1")?,
        y0: f.parse("sub-image y0")?,
    };
    let ybin: i64 = f.parse("sub-image y binning")?;
    let xbin: i64 = f.parse("sub-image x binning")?;

    if xbin <= 0 || ybin <= 0 {
        return Err(SifError::malformed(format!("sub-image binning {xbin}x{ybin} is not positive")));
    }
    let (width, height) = match (binned_extent(area.x0, area.x1, xbin), binned_extent(area.y0, area.y1, ybin)) {
        (Some(width), Some(height)) => (width, height),
        _ => {
            return Err(SifError::malformed(format!(
                "sub-image {area:?} binned {xbin}x{ybin} has no usable extent"
            )))
        }
    };

    Ok(SubImage {
        area,
        xbin,
        ybin,
        width,
        height,
    })
}

/// `(1 + hi - lo) / bin`, or `None` when it overflows or is not positive.
fn binned_extent(lo: i64, hi: i64, bin: i64) -> Option<usize> {
    let extent = hi.checked_sub(lo)?.checked_add(1)?.checked_div(bin)?;
    usize::try_from(extent).ok().filter(|&n| n > 0)
}

fn decode_timestamps(doc: &mut RawDocument<'_>, frames: usize) -> Result<Vec<i64>> {
    doc.skip_blank();
    let mut lines = Lines::new("timestamps", frames);
    (0..frames)
        .map(|_| parse_token("frame timestamp", lines.next(doc)?))
        .collect()
}

/// Consume the optional flag line between the timestamps and the payload.
fn locate_payload(doc: &mut RawDocument<'_>, version: u32, frames: usize) -> usize {
    let start = doc.position();
    let flag = doc
        .read_line()
        .and_then(|line| std::str::from_utf8(line).ok())
        .and_then(|s| s.trim().parse::<i64>().ok());
    match flag {
        Some(0) => {}
        Some(1) if version == EXTENDED_TIMESTAMPS => {
            for _ in 0..frames {
                doc.read_line();
            }
        }
        _ => doc.seek(start),
    }
    doc.position()
}

/// Per-frame coefficients embedded as `Calibration data for frame N: c0,c1,...` lines.
fn decode_frame_calibration(user_text: &[u8], frames: usize) -> Result<Option<Vec<Vec<f64>>>> {
    if !user_text.starts_with(FRAME_CALIBRATION_PREFIX) {
        return Ok(None);
    }
    let mut lines = user_text.split(|&b| b == b'\n').filter(|l| !l.is_empty());
    let per_frame = (0..frames)
        .map(|i| {
            let line = lines.next().ok_or(SifError::TruncatedHeader {
                record: "frame calibration",
                expected: frames,
                actual: i,
            })?;
            let values = line
                .splitn(2, |&b| b == b':')
                .nth(1)
                .ok_or_else(|| SifError::FieldParseError {
                    field: "frame calibration",
                    token: lossy(line),
                })?;
            values
                .split(|&b| b == b',')
                .map(|tok| parse_token("frame calibration coefficient", tok))
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(per_frame))
}
