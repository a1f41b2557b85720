// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The packed tensor type.
//!
//! A [`Mat`] is a dense tensor of up to four logical axes (`w`, `h`, `d`, `c`)
//! whose *stored unit* interleaves `elempack` scalar lanes. Which axis is
//! packed depends on the rank:
//!
//! | dims | packed axis | unit layout                                   |
//! |------|-------------|-----------------------------------------------|
//! | 1    | `w`         | `[w][pack]`                                   |
//! | 2    | `h`         | `[h][w][pack]`                                |
//! | 3    | `c`         | `[c][cstep][pack]`, plane = `h × w` units     |
//! | 4    | `c`         | `[c][cstep][pack]`, plane = `d × h × w` units |
//!
//! `elemsize` is the size of one stored unit in bytes (so a pack4 `f32`
//! tensor has `elemsize == 16`), and channel planes are `cstep` units apart.
//! The backing storage is always `c × cstep × elemsize` bytes.
//!
//! Storage is reference counted. [`Mat::channel`], [`Mat::channel_range`]
//! and [`Mat::reshape`] of contiguous data return *views* that share it
//! without copying. Views are read-only in effect: the mutable accessors
//! first give the handle a private copy of its lanes when the buffer is
//! shared, so a write never reaches another handle.

use crate::{Element, TensorError};
use memory_manager::{BufferGuard, MemoryError, MemoryPool};
use std::ptr::NonNull;
use std::sync::Arc;

/// Byte alignment of channel planes in owned 3-D and 4-D tensors.
const PLANE_ALIGN: usize = 16;

struct Storage {
    ptr: NonNull<u8>,
    len: usize,
    /// Pool the buffer came from; private copies are drawn from it too.
    pool: Option<MemoryPool>,
    _guard: BufferGuard,
}

// SAFETY: `ptr` points into the guard's heap words, which neither move nor
// reallocate while the guard is alive. Mutable slices are only handed out
// by a `Mat` whose `Arc<Storage>` is unique (see `Mat::make_unique`), so no
// other handle can observe the bytes while they are written.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    fn try_allocate(size: usize, alloc: Option<&MemoryPool>) -> Result<Arc<Storage>, MemoryError> {
        let mut guard = match alloc {
            Some(pool) => pool.allocate(size)?,
            None => BufferGuard::heap(size)?,
        };
        let ptr = NonNull::new(guard.as_mut_ptr()).ok_or(MemoryError::HeapExhausted {
            requested_bytes: size,
        })?;
        Ok(Arc::new(Storage {
            ptr,
            len: size,
            pool: alloc.cloned(),
            _guard: guard,
        }))
    }
}

/// A packed, reference-counted tensor (or a view into one).
///
/// The default value is the empty tensor; allocation failures also produce
/// it, so callers check [`Mat::is_empty`] before use.
#[derive(Clone, Default)]
pub struct Mat {
    storage: Option<Arc<Storage>>,
    /// Byte offset of this tensor (or view) inside `storage`.
    offset: usize,
    dims: usize,
    w: usize,
    h: usize,
    d: usize,
    c: usize,
    elemsize: usize,
    elempack: usize,
    cstep: usize,
}

fn canonical_cstep(dims: usize, w: usize, h: usize, d: usize, elemsize: usize) -> usize {
    match dims {
        3 | 4 => {
            let plane_bytes = w * h * d * elemsize;
            plane_bytes.div_ceil(PLANE_ALIGN) * PLANE_ALIGN / elemsize
        }
        _ => w * h,
    }
}

impl Mat {
    // ── Construction ──────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn allocate(
        dims: usize,
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        elemsize: usize,
        elempack: usize,
        alloc: Option<&MemoryPool>,
    ) -> Mat {
        let cstep = canonical_cstep(dims, w, h, d, elemsize);
        let bytes = cstep * c * elemsize;
        if bytes == 0 {
            return Mat::default();
        }
        match Storage::try_allocate(bytes, alloc) {
            Ok(storage) => Mat {
                storage: Some(storage),
                offset: 0,
                dims,
                w,
                h,
                d,
                c,
                elemsize,
                elempack,
                cstep,
            },
            Err(e) => {
                tracing::warn!(bytes, error = %e, "tensor allocation failed");
                Mat::default()
            }
        }
    }

    pub fn new_1d(w: usize, elemsize: usize, elempack: usize, alloc: Option<&MemoryPool>) -> Mat {
        Self::allocate(1, w, 1, 1, 1, elemsize, elempack, alloc)
    }

    pub fn new_2d(
        w: usize,
        h: usize,
        elemsize: usize,
        elempack: usize,
        alloc: Option<&MemoryPool>,
    ) -> Mat {
        Self::allocate(2, w, h, 1, 1, elemsize, elempack, alloc)
    }

    pub fn new_3d(
        w: usize,
        h: usize,
        c: usize,
        elemsize: usize,
        elempack: usize,
        alloc: Option<&MemoryPool>,
    ) -> Mat {
        Self::allocate(3, w, h, 1, c, elemsize, elempack, alloc)
    }

    pub fn new_4d(
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        elemsize: usize,
        elempack: usize,
        alloc: Option<&MemoryPool>,
    ) -> Mat {
        Self::allocate(4, w, h, d, c, elemsize, elempack, alloc)
    }

    /// Allocates a tensor of the given rank; unused extents must be 1.
    #[allow(clippy::too_many_arguments)]
    pub fn new_dims(
        dims: usize,
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        elemsize: usize,
        elempack: usize,
        alloc: Option<&MemoryPool>,
    ) -> Mat {
        Self::allocate(dims, w, h, d, c, elemsize, elempack, alloc)
    }

    /// Allocates an uninitialised tensor with the same geometry as `self`.
    pub fn new_like(&self, alloc: Option<&MemoryPool>) -> Mat {
        Self::allocate(
            self.dims,
            self.w,
            self.h,
            self.d,
            self.c,
            self.elemsize,
            self.elempack,
            alloc,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn matches(
        &self,
        dims: usize,
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        elemsize: usize,
        elempack: usize,
    ) -> bool {
        !self.is_empty()
            && self.dims == dims
            && self.w == w
            && self.h == h
            && self.d == d
            && self.c == c
            && self.elemsize == elemsize
            && self.elempack == elempack
    }

    /// Makes `self` a 3-D tensor of the given geometry.
    ///
    /// An existing buffer (or view) with identical geometry is kept; writing
    /// to a kept view still detaches it from its parent first.
    pub fn create_3d(
        &mut self,
        w: usize,
        h: usize,
        c: usize,
        elemsize: usize,
        elempack: usize,
        alloc: Option<&MemoryPool>,
    ) {
        if !self.matches(3, w, h, 1, c, elemsize, elempack) {
            *self = Self::new_3d(w, h, c, elemsize, elempack, alloc);
        }
    }

    /// 1-D counterpart of [`Mat::create_3d`].
    pub fn create_1d(&mut self, w: usize, elemsize: usize, elempack: usize, alloc: Option<&MemoryPool>) {
        if !self.matches(1, w, 1, 1, 1, elemsize, elempack) {
            *self = Self::new_1d(w, elemsize, elempack, alloc);
        }
    }

    /// 2-D counterpart of [`Mat::create_3d`].
    pub fn create_2d(
        &mut self,
        w: usize,
        h: usize,
        elemsize: usize,
        elempack: usize,
        alloc: Option<&MemoryPool>,
    ) {
        if !self.matches(2, w, h, 1, 1, elemsize, elempack) {
            *self = Self::new_2d(w, h, elemsize, elempack, alloc);
        }
    }

    /// 4-D counterpart of [`Mat::create_3d`].
    pub fn create_4d(
        &mut self,
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        elemsize: usize,
        elempack: usize,
        alloc: Option<&MemoryPool>,
    ) {
        if !self.matches(4, w, h, d, c, elemsize, elempack) {
            *self = Self::new_4d(w, h, d, c, elemsize, elempack, alloc);
        }
    }

    fn from_elements<T: Element>(
        dims: usize,
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        data: &[T],
    ) -> Result<Mat, TensorError> {
        let plane = w * h * d;
        if plane * c != data.len() {
            return Err(TensorError::LengthMismatch {
                expected: plane * c,
                actual: data.len(),
            });
        }
        let elemsize = std::mem::size_of::<T>();
        let cstep = canonical_cstep(dims, w, h, d, elemsize);
        let storage = Storage::try_allocate(cstep * c * elemsize, None)?;
        let mut m = Mat {
            storage: Some(storage),
            offset: 0,
            dims,
            w,
            h,
            d,
            c,
            elemsize,
            elempack: 1,
            cstep,
        };
        for q in 0..c {
            m.channel_slice_mut::<T>(q)
                .copy_from_slice(&data[q * plane..(q + 1) * plane]);
        }
        Ok(m)
    }

    /// Builds a pack1 `f32` vector from host data.
    pub fn from_f32_1d(w: usize, data: &[f32]) -> Result<Mat, TensorError> {
        Self::from_elements(1, w, 1, 1, 1, data)
    }

    /// Builds a pack1 `f32` matrix (`h` rows of `w`) from host data.
    pub fn from_f32_2d(w: usize, h: usize, data: &[f32]) -> Result<Mat, TensorError> {
        Self::from_elements(2, w, h, 1, 1, data)
    }

    /// Builds a pack1 `f32` tensor from `c` planes of `h × w` values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Mat;
    ///
    /// let m = Mat::from_f32_3d(2, 1, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    /// assert_eq!(m.c(), 3);
    /// assert_eq!(m.channel_slice::<f32>(2), &[5.0, 6.0]);
    /// ```
    pub fn from_f32_3d(w: usize, h: usize, c: usize, data: &[f32]) -> Result<Mat, TensorError> {
        Self::from_elements(3, w, h, 1, c, data)
    }

    pub fn from_f32_4d(
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        data: &[f32],
    ) -> Result<Mat, TensorError> {
        Self::from_elements(4, w, h, d, c, data)
    }

    // ── Geometry ──────────────────────────────────────────────

    /// Channel stride, in units, that a freshly allocated tensor of this
    /// geometry gets.
    pub fn cstep_for(dims: usize, w: usize, h: usize, d: usize, elemsize: usize) -> usize {
        canonical_cstep(dims, w, h, d, elemsize)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn w(&self) -> usize {
        self.w
    }

    pub fn h(&self) -> usize {
        self.h
    }

    pub fn d(&self) -> usize {
        self.d
    }

    pub fn c(&self) -> usize {
        self.c
    }

    /// Bytes per stored unit (lane size × `elempack`).
    pub fn elemsize(&self) -> usize {
        self.elemsize
    }

    pub fn elempack(&self) -> usize {
        self.elempack
    }

    /// Distance between channel planes, in stored units.
    pub fn cstep(&self) -> usize {
        self.cstep
    }

    /// Bits per scalar lane: 32 for `f32`, 16 for `f16`/`bf16`.
    pub fn elembits(&self) -> usize {
        if self.elempack == 0 {
            0
        } else {
            self.elemsize * 8 / self.elempack
        }
    }

    /// Stored units including inter-plane padding (`cstep × c`).
    pub fn total(&self) -> usize {
        self.cstep * self.c
    }

    /// Stored units in one channel plane (`w × h × d`).
    pub fn plane_units(&self) -> usize {
        self.w * self.h * self.d
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_none() || self.total() == 0
    }

    /// Whether both tensors view the same backing buffer.
    pub fn shares_storage_with(&self, other: &Mat) -> bool {
        match (&self.storage, &other.storage) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Decomposes the tensor around its packed axis.
    ///
    /// Returns `(outer, inner, stride)`: the packed-axis extent in stored
    /// units, the number of units sharing one packed coordinate, and the
    /// distance in units between consecutive packed coordinates.
    pub fn packed_axis(&self) -> (usize, usize, usize) {
        match self.dims {
            1 => (self.w, 1, 1),
            2 => (self.h, self.w, self.w),
            _ => (self.c, self.w * self.h * self.d, self.cstep),
        }
    }

    // ── Lane access ───────────────────────────────────────────

    fn check_lane<T>(&self) {
        assert!(
            std::mem::size_of::<T>() * self.elempack == self.elemsize,
            "lane type of {} bytes does not fit elemsize {} / elempack {}",
            std::mem::size_of::<T>(),
            self.elemsize,
            self.elempack
        );
    }

    /// Asserts that `bytes` from `offset` lie inside the allocation.
    fn check_bounds(&self, storage: &Storage, bytes: usize) {
        let end = self.offset.checked_add(bytes);
        assert!(
            end.is_some_and(|end| end <= storage.len),
            "tensor of {bytes} B at offset {} overruns its {} B buffer",
            self.offset,
            storage.len
        );
    }

    /// Whether this handle is the only one on its buffer.
    pub fn is_unique(&self) -> bool {
        match &self.storage {
            Some(storage) => Arc::strong_count(storage) == 1 && Arc::weak_count(storage) == 0,
            None => true,
        }
    }

    /// Gives this handle sole ownership of its bytes.
    ///
    /// A shared buffer is left to its other handles and the bytes this
    /// tensor covers are copied into a fresh one, from the same pool when it
    /// has room and from the heap otherwise.
    ///
    /// # Panics
    /// Panics if neither the pool nor the heap can supply the copy.
    fn make_unique(&mut self) {
        if self.is_unique() {
            return;
        }
        let Some(pool) = self.storage.as_ref().map(|storage| storage.pool.clone()) else {
            return;
        };
        let len = self.total() * self.elemsize;
        let fresh = Storage::try_allocate(len, pool.as_ref())
            .or_else(|_| Storage::try_allocate(len, None))
            .unwrap_or_else(|e| panic!("cannot detach {len} B from a shared tensor: {e}"));
        tracing::trace!(bytes = len, "copying shared tensor before write");

        let mut detached = self.clone();
        detached.storage = Some(fresh);
        detached.offset = 0;
        let source = std::mem::replace(self, detached);
        self.raw_bytes_mut().copy_from_slice(source.as_bytes());
    }

    /// Mutable bytes without the uniqueness step; callers ensure it.
    fn raw_bytes_mut(&mut self) -> &mut [u8] {
        let Some(storage) = self.storage.as_ref() else {
            return &mut [];
        };
        let len = self.total() * self.elemsize;
        self.check_bounds(storage, len);
        // SAFETY: the range was bounds checked above and the caller holds
        // the only handle on the buffer, so nothing else reads or writes it
        // for the lifetime of `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(storage.ptr.as_ptr().add(self.offset), len) }
    }

    /// All lanes of the tensor, inter-plane padding included.
    ///
    /// # Panics
    /// Panics if `T` does not match the lane size `elemsize / elempack`, or
    /// if the view does not fit its buffer.
    pub fn as_slice<T: bytemuck::Pod>(&self) -> &[T] {
        let Some(storage) = self.storage.as_ref() else {
            return &[];
        };
        self.check_lane::<T>();
        let lanes = self.total() * self.elempack;
        self.check_bounds(storage, lanes * std::mem::size_of::<T>());
        // SAFETY: the range lies inside the allocation (checked above),
        // `offset` is a multiple of the unit size so the pointer is aligned
        // for `T`, and `T: Pod` accepts any bit pattern. Writers need a
        // unique handle, so no `&mut` to these bytes exists while `self` is
        // borrowed.
        unsafe {
            std::slice::from_raw_parts(storage.ptr.as_ptr().add(self.offset).cast::<T>(), lanes)
        }
    }

    /// Mutable counterpart of [`Mat::as_slice`].
    ///
    /// A handle whose buffer is shared with clones or views is first given
    /// a private copy of its lanes, so other handles keep their values.
    ///
    /// # Panics
    /// As [`Mat::as_slice`], and when the private copy cannot be allocated.
    pub fn as_mut_slice<T: bytemuck::Pod>(&mut self) -> &mut [T] {
        self.check_lane::<T>();
        self.make_unique();
        let bytes = self.raw_bytes_mut();
        let lanes = bytes.len() / std::mem::size_of::<T>();
        // SAFETY: `bytes` is exclusively borrowed, aligned for `T` (see
        // `as_slice`) and holds exactly `lanes` values of `T`.
        unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<T>(), lanes) }
    }

    /// Raw bytes of the tensor (`total × elemsize`).
    pub fn as_bytes(&self) -> &[u8] {
        let Some(storage) = self.storage.as_ref() else {
            return &[];
        };
        let len = self.total() * self.elemsize;
        self.check_bounds(storage, len);
        // SAFETY: see `as_slice`; `u8` has no alignment requirement.
        unsafe { std::slice::from_raw_parts(storage.ptr.as_ptr().add(self.offset), len) }
    }

    /// Mutable raw bytes, detaching a shared buffer as [`Mat::as_mut_slice`] does.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.make_unique();
        self.raw_bytes_mut()
    }

    /// Lanes of channel plane `q`, without inter-plane padding.
    pub fn channel_slice<T: bytemuck::Pod>(&self, q: usize) -> &[T] {
        let start = q * self.cstep * self.elempack;
        let len = self.plane_units() * self.elempack;
        &self.as_slice::<T>()[start..start + len]
    }

    pub fn channel_slice_mut<T: bytemuck::Pod>(&mut self, q: usize) -> &mut [T] {
        let start = q * self.cstep * self.elempack;
        let len = self.plane_units() * self.elempack;
        &mut self.as_mut_slice::<T>()[start..start + len]
    }

    /// Lanes of row `y` of the first plane.
    pub fn row<T: bytemuck::Pod>(&self, y: usize) -> &[T] {
        let len = self.w * self.elempack;
        &self.as_slice::<T>()[y * len..(y + 1) * len]
    }

    /// Sets every lane to `v`.
    pub fn fill<T: bytemuck::Pod>(&mut self, v: T) {
        self.as_mut_slice::<T>().fill(v);
    }

    // ── Views ─────────────────────────────────────────────────

    /// A view of channel plane `q`, one rank lower.
    ///
    /// A 3-D tensor yields a 2-D `w × h` view; a 4-D tensor yields a 3-D view
    /// whose channels are the `d` slices.
    ///
    /// # Panics
    /// Panics if `q` is not a channel of the tensor.
    pub fn channel(&self, q: usize) -> Mat {
        let planes = if self.dims >= 3 { self.c } else { 1 };
        assert!(q < planes, "channel {q} out of bounds for {planes} channels");
        let mut m = self.clone();
        m.offset += q * self.cstep * self.elemsize;
        match self.dims {
            4 => {
                m.dims = 3;
                m.c = self.d;
                m.d = 1;
                m.cstep = self.w * self.h;
            }
            3 => {
                m.dims = 2;
                m.c = 1;
                m.cstep = self.w * self.h;
            }
            _ => {}
        }
        m
    }

    /// A view of `n` consecutive channels starting at `start`.
    ///
    /// # Panics
    /// Panics if the range runs past the last channel.
    pub fn channel_range(&self, start: usize, n: usize) -> Mat {
        assert!(
            start.checked_add(n).is_some_and(|end| end <= self.c),
            "channel range {start}..{start}+{n} out of bounds for {} channels",
            self.c
        );
        let mut m = self.clone();
        m.offset += start * self.cstep * self.elemsize;
        m.c = n;
        m
    }

    /// Copies every channel of `src` into channels `start..start + src.c()`.
    ///
    /// # Panics
    /// Panics if the plane geometry or unit layout differs, or the channels
    /// run past the end of `self`.
    pub fn copy_channels_from(&mut self, start: usize, src: &Mat) {
        assert!(
            (self.w, self.h, self.d, self.elemsize, self.elempack)
                == (src.w, src.h, src.d, src.elemsize, src.elempack),
            "cannot copy channels of {src:?} into {self:?}"
        );
        assert!(
            start.checked_add(src.c).is_some_and(|end| end <= self.c),
            "channels {start}..{start}+{} out of bounds for {} channels",
            src.c,
            self.c
        );
        let unit = self.elemsize;
        let plane = self.plane_units() * unit;
        let (src_step, dst_step) = (src.cstep * unit, self.cstep * unit);
        let from = src.as_bytes();
        let to = self.as_bytes_mut();
        for q in 0..src.c {
            let at = (start + q) * dst_step;
            to[at..at + plane].copy_from_slice(&from[q * src_step..q * src_step + plane]);
        }
    }

    // ── Reshape ───────────────────────────────────────────────

    fn is_contiguous(&self) -> bool {
        self.c == 1 || self.cstep == self.plane_units()
    }

    /// Reinterprets the stored units under a new geometry.
    ///
    /// Contiguous data is shared; otherwise the units are copied plane by
    /// plane into a tensor from `alloc`. The unit count must be preserved;
    /// a mismatch yields the empty tensor.
    #[allow(clippy::too_many_arguments)]
    pub fn reshape(
        &self,
        dims: usize,
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        alloc: Option<&MemoryPool>,
    ) -> Mat {
        if self.is_empty() || w * h * d * c != self.plane_units() * self.c {
            tracing::warn!(
                from = self.plane_units() * self.c,
                to = w * h * d * c,
                "reshape does not preserve the unit count"
            );
            return Mat::default();
        }

        let target_plane = w * h * d;
        let canonical = canonical_cstep(dims, w, h, d, self.elemsize);
        if self.is_contiguous() && (c == 1 || canonical == target_plane) {
            let mut m = self.clone();
            m.dims = dims;
            m.w = w;
            m.h = h;
            m.d = d;
            m.c = c;
            m.cstep = target_plane;
            return m;
        }

        let mut out = Self::allocate(dims, w, h, d, c, self.elemsize, self.elempack, alloc);
        if out.is_empty() {
            return out;
        }
        let unit = self.elemsize;
        let mut packed = Vec::with_capacity(self.plane_units() * self.c * unit);
        let src = self.as_bytes();
        for q in 0..self.c {
            let start = q * self.cstep * unit;
            packed.extend_from_slice(&src[start..start + self.plane_units() * unit]);
        }
        let out_cstep = out.cstep;
        let dst = out.as_bytes_mut();
        for q in 0..c {
            let from = q * target_plane * unit;
            let to = q * out_cstep * unit;
            dst[to..to + target_plane * unit]
                .copy_from_slice(&packed[from..from + target_plane * unit]);
        }
        out
    }

    pub fn reshape_1d(&self, w: usize, alloc: Option<&MemoryPool>) -> Mat {
        self.reshape(1, w, 1, 1, 1, alloc)
    }

    pub fn reshape_2d(&self, w: usize, h: usize, alloc: Option<&MemoryPool>) -> Mat {
        self.reshape(2, w, h, 1, 1, alloc)
    }

    pub fn reshape_3d(&self, w: usize, h: usize, c: usize, alloc: Option<&MemoryPool>) -> Mat {
        self.reshape(3, w, h, 1, c, alloc)
    }

    /// Deep copy into a new buffer from `alloc`.
    pub fn deep_clone(&self, alloc: Option<&MemoryPool>) -> Mat {
        if self.is_empty() {
            return Mat::default();
        }
        let mut out = self.new_like(alloc);
        if out.is_empty() {
            return out;
        }
        let unit = self.elemsize;
        let plane = self.plane_units() * unit;
        let (src_step, dst_step) = (self.cstep * unit, out.cstep * unit);
        let src = self.as_bytes();
        let dst = out.as_bytes_mut();
        for q in 0..self.c {
            dst[q * dst_step..q * dst_step + plane]
                .copy_from_slice(&src[q * src_step..q * src_step + plane]);
        }
        out
    }

    /// Logical values in unpacked order (`c`, then `d`, `h`, `w`).
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        if self.is_empty() {
            return Vec::new();
        }
        let lanes = self.as_slice::<T>();
        let pack = self.elempack;
        let (outer, inner, stride) = self.packed_axis();
        let mut out = Vec::with_capacity(outer * pack * inner);
        for o in 0..outer * pack {
            let (group, lane) = (o / pack, o % pack);
            for i in 0..inner {
                out.push(lanes[(group * stride + i) * pack + lane]);
            }
        }
        out
    }

    /// Logical values of an `f32` tensor, in unpacked order.
    pub fn to_vec_f32(&self) -> Vec<f32> {
        self.to_vec::<f32>()
    }
}

impl std::fmt::Debug for Mat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mat")
            .field("dims", &self.dims)
            .field("w", &self.w)
            .field("h", &self.h)
            .field("d", &self.d)
            .field("c", &self.c)
            .field("elemsize", &self.elemsize)
            .field("elempack", &self.elempack)
            .field("cstep", &self.cstep)
            .field("empty", &self.is_empty())
            .finish()
    }
}
