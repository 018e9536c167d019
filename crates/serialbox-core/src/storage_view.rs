//! Shape/stride views over caller-owned memory.
//!
//! The engine treats a storage view as an opaque source or sink of typed
//! scalar elements with a known shape: on write the view is gathered into a
//! contiguous little-endian buffer (strides and padding are not stored), on
//! read the buffer is scattered back in the view's element order.

use serialbox_error::{Result, SerialboxError};
use serialbox_types::ElementType;

/// Fixed-size scalar types a typed slice view can be built from.
pub trait Element: bytemuck::Pod {
    const ELEMENT_TYPE: ElementType;
}

impl Element for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::Int32;
}
impl Element for i64 {
    const ELEMENT_TYPE: ElementType = ElementType::Int64;
}
impl Element for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::Float32;
}
impl Element for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::Float64;
}

/// Shared layout/validation logic of the immutable and mutable views.
#[derive(Debug, Clone)]
struct ViewLayout {
    element_type: ElementType,
    bytes_per_element: usize,
    dims: Vec<i32>,
    /// Per-dimension strides in units of elements.
    strides: Vec<i64>,
}

impl ViewLayout {
    fn new(element_type: ElementType, dims: Vec<i32>, strides: Vec<i64>) -> Result<Self> {
        let bytes_per_element = element_type.size_of().ok_or_else(|| {
            SerialboxError::type_mismatch("fixed-size element type", element_type.name())
        })?;
        if dims.iter().any(|&d| d < 0) {
            return Err(SerialboxError::InvalidDimensions {
                dims: serialbox_types::field_meta_info::join_dims(&dims),
            });
        }
        if dims.len() != strides.len() {
            return Err(SerialboxError::corrupt(format!(
                "storage view has {} dims but {} strides",
                dims.len(),
                strides.len()
            )));
        }
        if strides.iter().any(|&s| s < 0) {
            return Err(SerialboxError::corrupt("storage view strides must be non-negative"));
        }
        Ok(Self {
            element_type,
            bytes_per_element,
            dims,
            strides,
        })
    }

    fn row_major(element_type: ElementType, dims: Vec<i32>) -> Result<Self> {
        let mut strides = vec![1_i64; dims.len()];
        for d in (0..dims.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * i64::from(dims[d + 1].max(0));
        }
        Self::new(element_type, dims, strides)
    }

    fn num_elements(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    fn byte_count(&self) -> usize {
        self.num_elements() * self.bytes_per_element
    }

    /// Minimal length in bytes the underlying buffer must have.
    fn required_len(&self) -> usize {
        if self.num_elements() == 0 {
            return 0;
        }
        let max_offset: i64 = self
            .dims
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| i64::from(d - 1) * s)
            .sum();
        (max_offset as usize + 1) * self.bytes_per_element
    }

    fn check_buffer(&self, len: usize) -> Result<()> {
        let required = self.required_len();
        if len < required {
            return Err(SerialboxError::corrupt(format!(
                "storage view spans {required} bytes but the buffer holds only {len}"
            )));
        }
        Ok(())
    }

    /// Invoke `f` with the byte offset of every element, in row-major order
    /// of the dims.
    fn for_each_offset(&self, mut f: impl FnMut(usize)) {
        let n = self.num_elements();
        if n == 0 {
            return;
        }
        let mut index = vec![0_i64; self.dims.len()];
        for _ in 0..n {
            let element: i64 = index.iter().zip(&self.strides).map(|(&i, &s)| i * s).sum();
            f(element as usize * self.bytes_per_element);
            for d in (0..self.dims.len()).rev() {
                index[d] += 1;
                if index[d] < i64::from(self.dims[d]) {
                    break;
                }
                index[d] = 0;
            }
        }
    }
}

/// Read-only typed view used on the write path.
#[derive(Debug, Clone)]
pub struct StorageView<'a> {
    data: &'a [u8],
    layout: ViewLayout,
}

impl<'a> StorageView<'a> {
    /// View over a contiguous row-major buffer.
    pub fn contiguous(data: &'a [u8], element_type: ElementType, dims: Vec<i32>) -> Result<Self> {
        let layout = ViewLayout::row_major(element_type, dims)?;
        layout.check_buffer(data.len())?;
        Ok(Self { data, layout })
    }

    /// View with explicit per-dimension element strides.
    pub fn with_strides(
        data: &'a [u8],
        element_type: ElementType,
        dims: Vec<i32>,
        strides: Vec<i64>,
    ) -> Result<Self> {
        let layout = ViewLayout::new(element_type, dims, strides)?;
        layout.check_buffer(data.len())?;
        Ok(Self { data, layout })
    }

    /// Contiguous view over a typed slice.
    pub fn of_slice<T: Element>(slice: &'a [T], dims: Vec<i32>) -> Result<Self> {
        Self::contiguous(bytemuck::cast_slice(slice), T::ELEMENT_TYPE, dims)
    }

    pub fn element_type(&self) -> ElementType {
        self.layout.element_type
    }

    pub fn dims(&self) -> &[i32] {
        &self.layout.dims
    }

    pub fn num_elements(&self) -> usize {
        self.layout.num_elements()
    }

    /// Size of the serialized payload in bytes.
    pub fn byte_count(&self) -> usize {
        self.layout.byte_count()
    }

    /// Gather the view into a contiguous little-endian byte buffer.
    pub fn to_le_buffer(&self) -> Vec<u8> {
        let bpe = self.layout.bytes_per_element;
        let mut buffer = Vec::with_capacity(self.byte_count());
        self.layout.for_each_offset(|offset| {
            let start = buffer.len();
            buffer.extend_from_slice(&self.data[offset..offset + bpe]);
            if cfg!(target_endian = "big") {
                buffer[start..].reverse();
            }
        });
        buffer
    }
}

/// Mutable typed view used on the read path.
#[derive(Debug)]
pub struct StorageViewMut<'a> {
    data: &'a mut [u8],
    layout: ViewLayout,
}

impl<'a> StorageViewMut<'a> {
    /// Mutable view over a contiguous row-major buffer.
    pub fn contiguous(
        data: &'a mut [u8],
        element_type: ElementType,
        dims: Vec<i32>,
    ) -> Result<Self> {
        let layout = ViewLayout::row_major(element_type, dims)?;
        layout.check_buffer(data.len())?;
        Ok(Self { data, layout })
    }

    /// Mutable view with explicit per-dimension element strides.
    pub fn with_strides(
        data: &'a mut [u8],
        element_type: ElementType,
        dims: Vec<i32>,
        strides: Vec<i64>,
    ) -> Result<Self> {
        let layout = ViewLayout::new(element_type, dims, strides)?;
        layout.check_buffer(data.len())?;
        Ok(Self { data, layout })
    }

    /// Contiguous mutable view over a typed slice.
    pub fn of_slice<T: Element>(slice: &'a mut [T], dims: Vec<i32>) -> Result<Self> {
        Self::contiguous(bytemuck::cast_slice_mut(slice), T::ELEMENT_TYPE, dims)
    }

    pub fn element_type(&self) -> ElementType {
        self.layout.element_type
    }

    pub fn dims(&self) -> &[i32] {
        &self.layout.dims
    }

    pub fn byte_count(&self) -> usize {
        self.layout.byte_count()
    }

    /// Scatter a contiguous little-endian buffer into the view, honoring the
    /// view's strides. The buffer length must equal `byte_count`.
    pub fn fill_from_le_buffer(&mut self, buffer: &[u8]) -> Result<()> {
        if buffer.len() != self.byte_count() {
            return Err(SerialboxError::ShortRead {
                expected: self.byte_count(),
                actual: buffer.len(),
            });
        }
        let bpe = self.layout.bytes_per_element;
        let mut cursor = 0;
        let data = &mut *self.data;
        self.layout.for_each_offset(|offset| {
            let target = &mut data[offset..offset + bpe];
            target.copy_from_slice(&buffer[cursor..cursor + bpe]);
            if cfg!(target_endian = "big") {
                target.reverse();
            }
            cursor += bpe;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_gather_is_identity_on_le() {
        let values = [1.0_f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = StorageView::of_slice(&values, vec![2, 3]).unwrap();
        assert_eq!(view.byte_count(), 48);
        assert_eq!(view.num_elements(), 6);
        let buffer = view.to_le_buffer();
        assert_eq!(buffer, bytemuck::cast_slice::<f64, u8>(&values));
    }

    #[test]
    fn strided_gather_picks_every_other_element() {
        let values = [10_i32, 11, 20, 21, 30, 31];
        // Column 0 of a 3x2 row-major matrix.
        let view = StorageView::with_strides(
            bytemuck::cast_slice(&values),
            ElementType::Int32,
            vec![3],
            vec![2],
        )
        .unwrap();
        let buffer = view.to_le_buffer();
        let gathered: Vec<i32> = buffer
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(gathered, vec![10, 20, 30]);
    }

    #[test]
    fn scatter_round_trip() {
        let values = [1.5_f32, -2.5, 3.5, 0.0];
        let view = StorageView::of_slice(&values, vec![4]).unwrap();
        let buffer = view.to_le_buffer();

        let mut restored = [0.0_f32; 4];
        let mut target = StorageViewMut::of_slice(&mut restored, vec![4]).unwrap();
        target.fill_from_le_buffer(&buffer).unwrap();
        assert_eq!(restored, values);
    }

    #[test]
    fn scatter_rejects_wrong_buffer_size() {
        let mut data = [0_i64; 4];
        let mut view = StorageViewMut::of_slice(&mut data, vec![4]).unwrap();
        let err = view.fill_from_le_buffer(&[0_u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            SerialboxError::ShortRead {
                expected: 32,
                actual: 8
            }
        ));
    }

    #[test]
    fn string_views_are_rejected() {
        let err = StorageView::contiguous(&[], ElementType::String, vec![1]).unwrap_err();
        assert!(matches!(err, SerialboxError::TypeMismatch { .. }));
    }

    #[test]
    fn undersized_buffer_rejected() {
        let data = [0_u8; 12];
        assert!(StorageView::contiguous(&data, ElementType::Float64, vec![2]).is_err());
        assert!(StorageView::contiguous(&data, ElementType::Float32, vec![3]).is_ok());
    }

    #[test]
    fn mismatched_strides_rejected() {
        let data = [0_u8; 32];
        let err =
            StorageView::with_strides(&data, ElementType::Float64, vec![2, 2], vec![2]).unwrap_err();
        assert!(matches!(err, SerialboxError::MetadataCorrupt { .. }));
    }

    #[test]
    fn boolean_views_from_raw_bytes() {
        let data = [1_u8, 0, 1];
        let view = StorageView::contiguous(&data, ElementType::Boolean, vec![3]).unwrap();
        assert_eq!(view.to_le_buffer(), vec![1, 0, 1]);
    }

    #[test]
    fn zero_element_view_has_empty_payload() {
        let view = StorageView::contiguous(&[], ElementType::Float64, vec![0]).unwrap();
        assert_eq!(view.byte_count(), 0);
        assert!(view.to_le_buffer().is_empty());
    }
}
