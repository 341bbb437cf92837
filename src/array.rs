//! Host-side N-dimensional arrays.
//!
//! [`HostArray`] is a dense, row-major array with a runtime element type. It
//! is the currency of the public API: `convolve` takes two of them and returns
//! a new one, never touching the caller's inputs.
//!
//! # Memory Layout
//!
//! Data is stored in row-major order (C-style): the last axis varies fastest.
//! A `[rows, cols]` array is laid out as `[r0c0, r0c1, ..., r1c0, ...]`.

use std::fmt;

use crate::error::{ConvError, ConvResult};

/// Element type of a [`HostArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Complex number made of two 32-bit floats `(re, im)`.
    Complex64,
}

impl ElementType {
    /// Returns the numpy-style name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
            ElementType::Uint8 => "uint8",
            ElementType::Uint16 => "uint16",
            ElementType::Uint32 => "uint32",
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::Complex64 => "complex64",
        }
    }

    /// Size of one element in bytes.
    pub const fn size_bytes(self) -> usize {
        match self {
            ElementType::Uint8 | ElementType::Int8 => 1,
            ElementType::Uint16 | ElementType::Int16 => 2,
            ElementType::Float32 | ElementType::Uint32 | ElementType::Int32 => 4,
            ElementType::Float64 | ElementType::Int64 | ElementType::Complex64 => 8,
        }
    }

    /// Whether values of this type can be converted to `f32`.
    pub const fn converts_to_f32(self) -> bool {
        !matches!(self, ElementType::Complex64)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed storage behind a [`HostArray`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// `float32` elements.
    Float32(Vec<f32>),
    /// `float64` elements.
    Float64(Vec<f64>),
    /// `uint8` elements.
    Uint8(Vec<u8>),
    /// `uint16` elements.
    Uint16(Vec<u16>),
    /// `uint32` elements.
    Uint32(Vec<u32>),
    /// `int8` elements.
    Int8(Vec<i8>),
    /// `int16` elements.
    Int16(Vec<i16>),
    /// `int32` elements.
    Int32(Vec<i32>),
    /// `int64` elements.
    Int64(Vec<i64>),
    /// `complex64` elements as `[re, im]` pairs.
    Complex64(Vec<[f32; 2]>),
}

impl ArrayData {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Float32(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
            ArrayData::Uint8(v) => v.len(),
            ArrayData::Uint16(v) => v.len(),
            ArrayData::Uint32(v) => v.len(),
            ArrayData::Int8(v) => v.len(),
            ArrayData::Int16(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Complex64(v) => v.len(),
        }
    }

    /// Returns true if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of the storage.
    pub fn element_type(&self) -> ElementType {
        match self {
            ArrayData::Float32(_) => ElementType::Float32,
            ArrayData::Float64(_) => ElementType::Float64,
            ArrayData::Uint8(_) => ElementType::Uint8,
            ArrayData::Uint16(_) => ElementType::Uint16,
            ArrayData::Uint32(_) => ElementType::Uint32,
            ArrayData::Int8(_) => ElementType::Int8,
            ArrayData::Int16(_) => ElementType::Int16,
            ArrayData::Int32(_) => ElementType::Int32,
            ArrayData::Int64(_) => ElementType::Int64,
            ArrayData::Complex64(_) => ElementType::Complex64,
        }
    }

    fn slice(&self, start: usize, end: usize) -> ArrayData {
        match self {
            ArrayData::Float32(v) => ArrayData::Float32(v[start..end].to_vec()),
            ArrayData::Float64(v) => ArrayData::Float64(v[start..end].to_vec()),
            ArrayData::Uint8(v) => ArrayData::Uint8(v[start..end].to_vec()),
            ArrayData::Uint16(v) => ArrayData::Uint16(v[start..end].to_vec()),
            ArrayData::Uint32(v) => ArrayData::Uint32(v[start..end].to_vec()),
            ArrayData::Int8(v) => ArrayData::Int8(v[start..end].to_vec()),
            ArrayData::Int16(v) => ArrayData::Int16(v[start..end].to_vec()),
            ArrayData::Int32(v) => ArrayData::Int32(v[start..end].to_vec()),
            ArrayData::Int64(v) => ArrayData::Int64(v[start..end].to_vec()),
            ArrayData::Complex64(v) => ArrayData::Complex64(v[start..end].to_vec()),
        }
    }
}

/// A dense row-major array living in host memory.
///
/// # Example
///
/// ```rust
/// use gpuconv::{ElementType, HostArray};
///
/// let image = HostArray::from_u16(vec![2, 3], vec![0, 1, 2, 3, 4, 5])?;
/// assert_eq!(image.rank(), 2);
/// assert_eq!(image.element_type(), ElementType::Uint16);
///
/// let as_float = image.to_f32()?;
/// assert_eq!(as_float.as_f32(), Some(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0][..]));
/// # Ok::<(), gpuconv::ConvError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl HostArray {
    /// Creates an array from a shape and typed storage.
    ///
    /// # Errors
    ///
    /// Returns `ConvError::ShapeMismatch` if an extent is zero or the data
    /// length differs from the shape product.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> ConvResult<Self> {
        if shape.iter().any(|&n| n == 0) {
            return Err(ConvError::shape_mismatch(
                &shape.iter().map(|&n| n.max(1)).collect::<Vec<_>>(),
                &shape,
            ));
        }
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ConvError::shape_mismatch(&shape, &[data.len()]));
        }
        Ok(Self { shape, data })
    }

    /// Creates a `float32` array.
    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> ConvResult<Self> {
        Self::new(shape, ArrayData::Float32(data))
    }

    /// Creates a `uint16` array.
    pub fn from_u16(shape: Vec<usize>, data: Vec<u16>) -> ConvResult<Self> {
        Self::new(shape, ArrayData::Uint16(data))
    }

    /// Creates a `float64` array.
    pub fn from_f64(shape: Vec<usize>, data: Vec<f64>) -> ConvResult<Self> {
        Self::new(shape, ArrayData::Float64(data))
    }

    /// Creates a `float32` array with every element set to `value`.
    pub fn filled(shape: Vec<usize>, value: f32) -> ConvResult<Self> {
        let len = shape.iter().product();
        Self::from_f32(shape, vec![value; len])
    }

    /// Creates a `float32` array of zeros.
    pub fn zeros(shape: Vec<usize>) -> ConvResult<Self> {
        Self::filled(shape, 0.0)
    }

    /// Creates a `float32` array of ones.
    pub fn ones(shape: Vec<usize>) -> ConvResult<Self> {
        Self::filled(shape, 1.0)
    }

    /// Shape of the array.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element type of the array.
    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    /// Typed storage.
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Borrows the elements if the array is `float32`.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ArrayData::Float32(v) => Some(v),
            _ => None,
        }
    }

    /// Borrows the elements if the array is `uint16`.
    pub fn as_u16(&self) -> Option<&[u16]> {
        match &self.data {
            ArrayData::Uint16(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements converted to `float32`.
    ///
    /// Conversion is lossy for wide integer and `float64` values.
    ///
    /// # Errors
    ///
    /// Returns `ConvError::UnsupportedType` for `complex64` arrays.
    pub fn to_f32_vec(&self) -> ConvResult<Vec<f32>> {
        Ok(match &self.data {
            ArrayData::Float32(v) => v.clone(),
            ArrayData::Float64(v) => v.iter().map(|&x| x as f32).collect(),
            ArrayData::Uint8(v) => v.iter().map(|&x| f32::from(x)).collect(),
            ArrayData::Uint16(v) => v.iter().map(|&x| f32::from(x)).collect(),
            ArrayData::Uint32(v) => v.iter().map(|&x| x as f32).collect(),
            ArrayData::Int8(v) => v.iter().map(|&x| f32::from(x)).collect(),
            ArrayData::Int16(v) => v.iter().map(|&x| f32::from(x)).collect(),
            ArrayData::Int32(v) => v.iter().map(|&x| x as f32).collect(),
            ArrayData::Int64(v) => v.iter().map(|&x| x as f32).collect(),
            ArrayData::Complex64(_) => {
                return Err(ConvError::unsupported_type(
                    ElementType::Complex64,
                    &[ElementType::Float32],
                ))
            }
        })
    }

    /// Returns a `float32` copy of the array.
    ///
    /// # Errors
    ///
    /// Returns `ConvError::UnsupportedType` for `complex64` arrays.
    pub fn to_f32(&self) -> ConvResult<HostArray> {
        Ok(HostArray {
            shape: self.shape.clone(),
            data: ArrayData::Float32(self.to_f32_vec()?),
        })
    }

    /// Returns a copy with a new shape holding the same number of elements.
    pub fn reshape(&self, shape: Vec<usize>) -> ConvResult<HostArray> {
        HostArray::new(shape, self.data.clone())
    }

    /// Returns the sub-array at `index` along the leading axis.
    ///
    /// This is `a[index, ...]`: the result has rank `rank - 1`.
    ///
    /// # Errors
    ///
    /// Returns `ConvError::UnsupportedRank` for rank-1 arrays and
    /// `ConvError::ShapeMismatch` if `index` is out of bounds.
    pub fn index_axis0(&self, index: usize) -> ConvResult<HostArray> {
        if self.rank() < 2 {
            return Err(ConvError::UnsupportedRank(self.rank().saturating_sub(1)));
        }
        if index >= self.shape[0] {
            return Err(ConvError::shape_mismatch(&self.shape[..1], &[index]));
        }
        let inner = self.shape[1..].to_vec();
        let stride: usize = inner.iter().product();
        let start = index * stride;
        Ok(HostArray {
            data: self.data.slice(start, start + stride),
            shape: inner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_product_checked() {
        let err = HostArray::from_f32(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, ConvError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_zero_extent_rejected() {
        assert!(HostArray::from_f32(vec![0, 3], vec![]).is_err());
    }

    #[test]
    fn test_rank_zero_scalar_allowed() {
        let scalar = HostArray::from_f32(vec![], vec![7.0]).unwrap();
        assert_eq!(scalar.rank(), 0);
        assert_eq!(scalar.len(), 1);
    }

    #[test]
    fn test_to_f32_from_integer_types() {
        let a = HostArray::new(vec![3], ArrayData::Int32(vec![-1, 0, 70000])).unwrap();
        let f = a.to_f32().unwrap();
        assert_eq!(f.as_f32().unwrap(), &[-1.0, 0.0, 70000.0]);
        assert_eq!(f.shape(), &[3]);
        // source untouched
        assert_eq!(a.element_type(), ElementType::Int32);
    }

    #[test]
    fn test_to_f32_lossy_f64() {
        let a = HostArray::from_f64(vec![1], vec![0.1]).unwrap();
        let f = a.to_f32().unwrap();
        assert_eq!(f.as_f32().unwrap()[0], 0.1f32);
    }

    #[test]
    fn test_to_f32_vec() {
        let a = HostArray::new(vec![2, 2], ArrayData::Int16(vec![-2, 0, 7, 300])).unwrap();
        assert_eq!(a.to_f32_vec().unwrap(), vec![-2.0, 0.0, 7.0, 300.0]);

        let c = HostArray::new(vec![1], ArrayData::Complex64(vec![[1.0, 1.0]])).unwrap();
        assert!(matches!(c.to_f32_vec(), Err(ConvError::UnsupportedType { .. })));
    }

    #[test]
    fn test_complex_does_not_convert() {
        let a = HostArray::new(vec![2], ArrayData::Complex64(vec![[1.0, 0.0], [0.0, 1.0]]))
            .unwrap();
        assert!(!a.element_type().converts_to_f32());
        match a.to_f32() {
            Err(ConvError::UnsupportedType { found, .. }) => {
                assert_eq!(found, ElementType::Complex64)
            }
            other => panic!("expected UnsupportedType, got {:?}", other),
        }
    }

    #[test]
    fn test_index_axis0() {
        let a = HostArray::from_f32(vec![2, 2, 3], (0..12).map(|x| x as f32).collect()).unwrap();
        let plane = a.index_axis0(1).unwrap();
        assert_eq!(plane.shape(), &[2, 3]);
        assert_eq!(plane.as_f32().unwrap(), &[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);

        let row = plane.index_axis0(0).unwrap();
        assert_eq!(row.shape(), &[3]);
        assert_eq!(row.as_f32().unwrap(), &[6.0, 7.0, 8.0]);

        assert!(row.index_axis0(0).is_err());
        assert!(a.index_axis0(2).is_err());
    }

    #[test]
    fn test_reshape_keeps_data() {
        let a = HostArray::ones(vec![4, 5]).unwrap();
        let b = a.reshape(vec![1, 4, 5]).unwrap();
        assert_eq!(b.rank(), 3);
        assert_eq!(b.len(), 20);
        assert!(a.reshape(vec![3, 7]).is_err());
    }

    #[test]
    fn test_element_type_names() {
        assert_eq!(ElementType::Uint16.to_string(), "uint16");
        assert_eq!(ElementType::Float32.size_bytes(), 4);
        assert_eq!(ElementType::Uint16.size_bytes(), 2);
    }
}
