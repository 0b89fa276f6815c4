//! Raw VSFP frame extraction.
//!
//! `.rsd` files are a flat run of signed 16-bit little-endian words. Every
//! 12,800 words form one 128 x 100 slab stored column-major. Rows 20..120 of a
//! slab are the 100 x 100 image; rows 0..20 are a side-band that carries
//! auxiliary analog samples; rows 120..128 are dropped.

use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use ndarray::{s, Array2, Array3, ArrayView2, ShapeBuilder};

use crate::error::{require_file, ConvertError, Result};

/// Rows of a raw slab
pub const SLAB_ROWS: usize = 128;
/// Columns of a raw slab (and of the image)
pub const SLAB_COLS: usize = 100;
/// Words per slab
pub const WORDS_PER_FRAME: usize = SLAB_ROWS * SLAB_COLS;
/// Bytes per slab
pub const BYTES_PER_FRAME: usize = WORDS_PER_FRAME * 2;
/// Side-band rows at the top of a slab
pub const SIDE_BAND_ROWS: usize = 20;
/// Rows of the active image
pub const ACTIVE_ROWS: usize = 100;

const ACTIVE_START: usize = SIDE_BAND_ROWS;
const ACTIVE_END: usize = ACTIVE_START + ACTIVE_ROWS;

// The side-band packs one analog sample every 4th column over the first 80 columns
const SIDE_BAND_SAMPLE_COLS: usize = 80;
const SIDE_BAND_SAMPLE_STEP: usize = 4;

/// Sign applied to decoded words before the slab is split.
///
/// The camera stores inverted intensities. `Inverted` negates every word and
/// is what the imaging section writes unless told otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignConvention {
    /// Negate every word (stored frames are `-word`)
    #[default]
    Inverted,
    /// Keep words as they are on disk
    AsRecorded,
}

impl SignConvention {
    #[inline]
    pub fn apply(self, word: i16) -> i32 {
        match self {
            SignConvention::Inverted => -(word as i32),
            SignConvention::AsRecorded => word as i32,
        }
    }
}

impl std::str::FromStr for SignConvention {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inverted" | "negated" => Ok(SignConvention::Inverted),
            "as-recorded" | "as_recorded" | "raw" => Ok(SignConvention::AsRecorded),
            other => Err(ConvertError::Config(format!(
                "unknown sign convention '{}', expected 'inverted' or 'as-recorded'",
                other
            ))),
        }
    }
}

/// One decoded slab, already split.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Image region, shape [100, 100]
    pub active: Array2<i32>,
    /// Side-band region, shape [20, 100]
    pub side_band: Array2<i32>,
}

impl RawFrame {
    /// Samples of one side-band analog row (columns 0..80, every 4th column).
    ///
    /// Row 8 carries the stimulus trigger, rows 12 and 14 the two analog inputs.
    pub fn side_band_samples(&self, row: usize) -> Vec<i32> {
        self.side_band
            .slice(s![row, 0..SIDE_BAND_SAMPLE_COLS;SIDE_BAND_SAMPLE_STEP])
            .to_vec()
    }
}

/// Lazy iterator over the frames of one decoded buffer.
///
/// Produced by [`decode_frames`]. Frames come out in file order; once consumed
/// the buffer is gone and the file has to be read again.
#[derive(Debug)]
pub struct Frames {
    words: Vec<i16>,
    next: usize,
    count: usize,
    sign: SignConvention,
}

impl Frames {
    /// Number of frames in the buffer, consumed or not
    pub fn frame_count(&self) -> usize {
        self.count
    }

    fn slab(&self, index: usize) -> Option<ArrayView2<'_, i16>> {
        let start = index * WORDS_PER_FRAME;
        let words = self.words.get(start..start + WORDS_PER_FRAME)?;
        // Column-major: word (row, col) sits at col * SLAB_ROWS + row
        ArrayView2::from_shape((SLAB_ROWS, SLAB_COLS).f(), words).ok()
    }
}

impl Iterator for Frames {
    type Item = RawFrame;

    fn next(&mut self) -> Option<RawFrame> {
        if self.next >= self.count {
            return None;
        }
        let sign = self.sign;
        let slab = self.slab(self.next)?;
        let active = slab
            .slice(s![ACTIVE_START..ACTIVE_END, ..])
            .mapv(|w| sign.apply(w))
            .as_standard_layout()
            .into_owned();
        let side_band = slab
            .slice(s![0..SIDE_BAND_ROWS, ..])
            .mapv(|w| sign.apply(w))
            .as_standard_layout()
            .into_owned();
        self.next += 1;
        Some(RawFrame { active, side_band })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames {}

/// Validates a raw buffer and returns a lazy frame iterator over it.
///
/// Fails with `Decode` when the length is not a whole number of slabs; in that
/// case no frame is produced at all.
pub fn decode_frames(bytes: &[u8], sign: SignConvention) -> Result<Frames> {
    if bytes.len() % BYTES_PER_FRAME != 0 {
        return Err(ConvertError::Decode(format!(
            "buffer of {} bytes is not a multiple of the {}-byte frame stride ({} trailing bytes)",
            bytes.len(),
            BYTES_PER_FRAME,
            bytes.len() % BYTES_PER_FRAME
        )));
    }

    let mut words = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(bytes, &mut words);
    let count = words.len() / WORDS_PER_FRAME;

    Ok(Frames {
        words,
        next: 0,
        count,
        sign,
    })
}

/// Reads a whole `.rsd` file and decodes it.
pub fn read_frame_file<P: AsRef<Path>>(path: P, sign: SignConvention) -> Result<Frames> {
    let path = path.as_ref();
    require_file(path)?;
    let bytes = fs::read(path)?;
    decode_frames(&bytes, sign).map_err(|e| match e {
        ConvertError::Decode(msg) => ConvertError::Decode(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Number of frames a raw file will yield, checked from its size alone.
pub fn frame_count_from_len(len: u64) -> Result<usize> {
    if len % BYTES_PER_FRAME as u64 != 0 {
        return Err(ConvertError::Decode(format!(
            "file of {} bytes is not a multiple of the {}-byte frame stride",
            len, BYTES_PER_FRAME
        )));
    }
    Ok((len / BYTES_PER_FRAME as u64) as usize)
}

/// Groups active frames into stacks of at most `buffer` frames.
///
/// Keeps peak memory at one stack while the serializer drains a recording that
/// spans many files. An error from the inner iterator is passed through and
/// ends the stream.
pub struct FrameChunks<I> {
    inner: I,
    buffer: usize,
    failed: bool,
}

impl<I> FrameChunks<I>
where
    I: Iterator<Item = Result<Array2<i32>>>,
{
    pub fn new(inner: I, buffer: usize) -> Self {
        Self {
            inner,
            buffer: buffer.max(1),
            failed: false,
        }
    }
}

impl<I> Iterator for FrameChunks<I>
where
    I: Iterator<Item = Result<Array2<i32>>>,
{
    type Item = Result<Array3<i32>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut pending = Vec::with_capacity(self.buffer);
        while pending.len() < self.buffer {
            match self.inner.next() {
                Some(Ok(frame)) => pending.push(frame),
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => break,
            }
        }

        if pending.is_empty() {
            return None;
        }

        let mut stack = Array3::<i32>::zeros((pending.len(), ACTIVE_ROWS, SLAB_COLS));
        for (i, frame) in pending.iter().enumerate() {
            if frame.dim() != (ACTIVE_ROWS, SLAB_COLS) {
                self.failed = true;
                return Some(Err(ConvertError::Decode(format!(
                    "frame of shape {:?} does not match the {}x{} image",
                    frame.dim(),
                    ACTIVE_ROWS,
                    SLAB_COLS
                ))));
            }
            stack.slice_mut(s![i, .., ..]).assign(frame);
        }
        Some(Ok(stack))
    }
}
