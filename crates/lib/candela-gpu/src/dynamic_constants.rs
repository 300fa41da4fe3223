//! Two-slot upload region for per-frame constants. The CPU writes slot
//! `frame mod 2`; the frame fence guarantees the GPU is done reading a
//! slot before the CPU comes back around to it.

use bytemuck::Pod;

use crate::backend::GpuBackend;
use crate::desc::BufferDesc;
use crate::error::GpuError;
use crate::handles::BufferHandle;

pub const DYNAMIC_CONSTANTS_SIZE_BYTES: usize = 1024 * 1024;
pub const DYNAMIC_CONSTANTS_BUFFER_COUNT: usize = 2;
pub const DYNAMIC_CONSTANTS_ALIGNMENT: usize = 256;

pub struct DynamicConstants {
    pub buffer: BufferHandle,
    frame_offset_bytes: usize,
    frame_parity: usize,
}

impl DynamicConstants {
    pub fn new(backend: &mut dyn GpuBackend) -> Result<Self, GpuError> {
        let buffer = backend.create_buffer(
            BufferDesc::upload(DYNAMIC_CONSTANTS_SIZE_BYTES * DYNAMIC_CONSTANTS_BUFFER_COUNT),
            "dynamic constants",
        )?;

        Ok(Self {
            buffer,
            frame_offset_bytes: 0,
            frame_parity: 0,
        })
    }

    pub fn advance_frame(&mut self) {
        self.frame_parity = (self.frame_parity + 1) % DYNAMIC_CONSTANTS_BUFFER_COUNT;
        self.frame_offset_bytes = 0;
    }

    pub fn frame_parity(&self) -> usize {
        self.frame_parity
    }

    pub fn current_offset(&self) -> usize {
        self.frame_parity * DYNAMIC_CONSTANTS_SIZE_BYTES + self.frame_offset_bytes
    }

    /// Writes `t` at the current cursor and returns its device offset.
    pub fn push<T: Pod>(
        &mut self,
        backend: &mut dyn GpuBackend,
        t: &T,
    ) -> Result<usize, GpuError> {
        self.push_bytes(backend, bytemuck::bytes_of(t))
    }

    /// Writes a contiguous slice of records; returns the offset of the
    /// first one.
    pub fn push_slice<T: Pod>(
        &mut self,
        backend: &mut dyn GpuBackend,
        ts: &[T],
    ) -> Result<usize, GpuError> {
        self.push_bytes(backend, bytemuck::cast_slice(ts))
    }

    fn push_bytes(&mut self, backend: &mut dyn GpuBackend, bytes: &[u8]) -> Result<usize, GpuError> {
        let len = bytes.len();
        if self.frame_offset_bytes + len > DYNAMIC_CONSTANTS_SIZE_BYTES {
            return Err(GpuError::OutOfBounds {
                info: format!(
                    "dynamic constants frame overflow: {} + {} > {}",
                    self.frame_offset_bytes, len, DYNAMIC_CONSTANTS_SIZE_BYTES
                ),
            });
        }

        let offset = self.current_offset();
        backend.write_buffer(self.buffer, offset, bytes)?;

        self.frame_offset_bytes +=
            len.next_multiple_of(DYNAMIC_CONSTANTS_ALIGNMENT);

        Ok(offset)
    }

    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        backend.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingBackend;

    #[test]
    fn pushes_are_aligned_and_parity_separated() {
        let mut backend = RecordingBackend::new();
        let mut dc = DynamicConstants::new(&mut backend).unwrap();

        let a = dc.push(&mut backend, &[1u32; 4]).unwrap();
        let b = dc.push(&mut backend, &[2u32; 4]).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, DYNAMIC_CONSTANTS_ALIGNMENT);

        dc.advance_frame();
        let c = dc.push(&mut backend, &[3u32; 4]).unwrap();
        assert_eq!(c, DYNAMIC_CONSTANTS_SIZE_BYTES);

        dc.advance_frame();
        let d = dc.push(&mut backend, &[4u32; 4]).unwrap();
        assert_eq!(d, 0);
    }

    #[test]
    fn frame_overflow_is_an_error() {
        let mut backend = RecordingBackend::new();
        let mut dc = DynamicConstants::new(&mut backend).unwrap();

        let big = vec![0u8; DYNAMIC_CONSTANTS_SIZE_BYTES];
        dc.push_slice(&mut backend, &big).unwrap();
        assert!(dc.push(&mut backend, &0u32).is_err());
    }
}
