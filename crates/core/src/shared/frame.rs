use ndarray::{ArrayView3, ArrayViewMut3};

/// A single decoded video frame: contiguous RGB bytes in row-major order.
///
/// Format conversion happens at I/O boundaries only; stages see tightly
/// packed pixels. A frame is owned by exactly one pipeline step at a time:
/// stages take it by value and hand it back (or drop it).
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
    timestamp: f64,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        index: usize,
        timestamp: f64,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            timestamp,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Presentation time in seconds from the start of the stream.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Replaces the pixel buffer with one of new dimensions, keeping the
    /// frame's identity (index, timestamp, channel layout).
    pub fn replace_pixels(&mut self, data: Vec<u8>, width: u32, height: u32) {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (self.channels as usize),
            "data length must equal width * height * channels"
        );
        self.data = data;
        self.width = width;
        self.height = height;
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    pub fn as_ndarray_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        ArrayViewMut3::from_shape(self.shape(), &mut self.data)
            .expect("Frame data length must match dimensions")
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
