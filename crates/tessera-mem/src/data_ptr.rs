//! `DataPtr`: exclusive owner of one block of device memory.
//!
//! A `DataPtr` bundles the data pointer with an opaque context and the function
//! that releases that context. The data pointer and the context are often the
//! same address, but allocators that need bookkeeping (layout, budget, a boxed
//! closure) store it in the context instead. Ownership moves with the value;
//! the release function runs exactly once, on drop or on [`DataPtr::clear`].

use std::ffi::c_void;
use std::fmt;
use std::ptr;

use tessera_core::{Device, DeviceType};

/// Releases a context. Called at most once per context.
pub type DeleterFn = unsafe fn(*mut c_void);

pub struct DataPtr {
    data: *mut u8,
    ctx: *mut c_void,
    deleter: Option<DeleterFn>,
    device: Device,
}

// SAFETY: a DataPtr is the sole owner of its context, and every constructor
// requires a deleter that may run on any thread (`from_fn` enforces `Send`).
unsafe impl Send for DataPtr {}
// SAFETY: shared access only reads the pointer values; touching the pointee is
// already an unsafe operation left to the caller.
unsafe impl Sync for DataPtr {}

impl DataPtr {
    /// A handle that owns nothing. Dropping it is a no-op.
    pub const fn empty(device: Device) -> Self {
        Self {
            data: ptr::null_mut(),
            ctx: ptr::null_mut(),
            deleter: None,
            device,
        }
    }

    /// Take ownership of `ctx`, to be released with `deleter`.
    ///
    /// # Safety
    ///
    /// `deleter` must be sound to call exactly once with `ctx` from any thread,
    /// and nothing else may release `ctx`. `data` must stay valid until then.
    pub const unsafe fn new(
        data: *mut u8,
        ctx: *mut c_void,
        deleter: Option<DeleterFn>,
        device: Device,
    ) -> Self {
        Self {
            data,
            ctx,
            deleter,
            device,
        }
    }

    /// Handle whose context is the data pointer itself.
    ///
    /// # Safety
    ///
    /// Same contract as [`DataPtr::new`] with `ctx == data`.
    pub unsafe fn from_raw(data: *mut u8, deleter: Option<DeleterFn>, device: Device) -> Self {
        Self::new(data, data.cast(), deleter, device)
    }

    /// Adapt an arbitrary closure to the release-once protocol. The closure
    /// is boxed into a heap context and receives `data` when the handle is
    /// released.
    pub fn from_fn<F>(data: *mut u8, deleter: F, device: Device) -> Self
    where
        F: FnOnce(*mut u8) + Send + 'static,
    {
        let ctx = Box::new(FnContext {
            data,
            deleter: Box::new(deleter),
        });
        // SAFETY: the context was just boxed here and `delete_fn_context`
        // is its matching release function.
        unsafe { Self::new(data, Box::into_raw(ctx).cast(), Some(delete_fn_context), device) }
    }

    #[inline]
    pub fn get(&self) -> *mut u8 {
        self.data
    }

    #[inline]
    pub fn context(&self) -> *mut c_void {
        self.ctx
    }

    #[inline]
    pub fn deleter(&self) -> Option<DeleterFn> {
        self.deleter
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub fn device_type(&self) -> DeviceType {
        self.device.device_type()
    }

    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// Release the context now and null the handle. Clearing twice is a no-op.
    pub fn clear(&mut self) {
        let ctx = std::mem::replace(&mut self.ctx, ptr::null_mut());
        let deleter = self.deleter.take();
        self.data = ptr::null_mut();
        if ctx.is_null() {
            return;
        }
        if let Some(deleter) = deleter {
            // SAFETY: guaranteed by the constructor contract; the context was
            // nulled above so this cannot run twice.
            unsafe { deleter(ctx) };
        }
    }

    /// Give up ownership of the context without releasing it.
    #[must_use = "the returned context leaks unless it is released"]
    pub fn into_raw_parts(self) -> (*mut u8, *mut c_void, Option<DeleterFn>) {
        let me = std::mem::ManuallyDrop::new(self);
        (me.data, me.ctx, me.deleter)
    }
}

impl Drop for DataPtr {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for DataPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPtr")
            .field("data", &self.data)
            .field("ctx", &self.ctx)
            .field("device", &self.device)
            .finish()
    }
}

struct FnContext {
    data: *mut u8,
    deleter: Box<dyn FnOnce(*mut u8) + Send>,
}

unsafe fn delete_fn_context(ctx: *mut c_void) {
    // SAFETY: only installed by `DataPtr::from_fn`, which boxed an FnContext.
    let FnContext { data, deleter } = *unsafe { Box::from_raw(ctx.cast::<FnContext>()) };
    deleter(data);
}
