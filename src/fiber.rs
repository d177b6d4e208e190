//! Execution contexts (fibers).
//!
//! A [`Fiber`] is either a stackful context created with [`Fiber::new`], or the
//! "home" context of an OS thread obtained with [`Fiber::convert_current_thread`].
//! Control moves between them with [`Fiber::switch_to`]:
//!
//! - switching to a stack fiber resumes it on the calling thread, and
//! - switching to a thread fiber suspends the running stack fiber, returning
//!   control to whichever context last resumed it.
//!
//! Stack fibers are `corosensei` coroutines. A suspended fiber may be resumed
//! from a different OS thread than the one that suspended it.

use crate::error::FiberError;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::{Cell, UnsafeCell};
use std::ptr;

/// Entry point of a stack fiber. Receives the fiber's data pointer.
pub type FiberEntry = fn(*mut ());

/// Stack sizes are rounded up to this granularity, which is also the minimum.
pub const STACK_ALIGN: usize = 64 * 1024;

type FiberCoroutine = Coroutine<(), (), (), DefaultStack>;
type YielderSlot = Cell<*const Yielder<(), ()>>;

thread_local! {
    /// The stack fiber currently running on this thread, if any.
    static CURRENT_FIBER: Cell<*const Fiber> = const { Cell::new(ptr::null()) };
    /// Data pointer of this thread's converted home context.
    static THREAD_DATA: Cell<*mut ()> = const { Cell::new(ptr::null_mut()) };
}

/// Rounds a requested stack size the way [`Fiber::new`] does.
pub fn aligned_stack_size(requested: usize) -> usize {
    requested.max(STACK_ALIGN).next_multiple_of(STACK_ALIGN)
}

enum FiberKind {
    Thread,
    Stack {
        coroutine: UnsafeCell<FiberCoroutine>,
        /// Written once by the coroutine when it first runs. Boxed so its
        /// address survives moves of the `Fiber`.
        yielder: Box<YielderSlot>,
        stack_size: usize,
    },
}

/// A switchable execution context carrying one opaque data pointer.
///
/// Move-only. A stack fiber must not be dropped while it is running, and must
/// not be switched to again once its entry function has returned.
pub struct Fiber {
    data: *mut (),
    kind: FiberKind,
}

// SAFETY: a fiber is only ever resumed by one thread at a time; the scheduler
// hands fibers between threads through its queues and never shares a running one.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Creates a suspended stack fiber that will run `entry(data)` when first
    /// switched to.
    ///
    /// `stack_size` is raised to at least [`STACK_ALIGN`] and rounded up to a
    /// multiple of it.
    pub fn new(entry: FiberEntry, data: *mut (), stack_size: usize) -> Result<Self, FiberError> {
        let size = aligned_stack_size(stack_size);
        let stack = DefaultStack::new(size)
            .map_err(|source| FiberError::StackAllocation { size, source })?;

        let yielder: Box<YielderSlot> = Box::new(Cell::new(ptr::null()));
        let slot: *const YielderSlot = &*yielder;

        let coroutine = Coroutine::with_stack(stack, move |yielder: &Yielder<(), ()>, ()| {
            // SAFETY: the slot is owned by the same `Fiber` as this coroutine
            // and outlives it.
            unsafe { (*slot).set(yielder as *const _) };
            entry(data);
        });

        Ok(Fiber {
            data,
            kind: FiberKind::Stack {
                coroutine: UnsafeCell::new(coroutine),
                yielder,
                stack_size: size,
            },
        })
    }

    /// Turns the calling OS thread into a context that stack fibers can switch
    /// back to. Called once per thread before it resumes any stack fiber.
    pub fn convert_current_thread(data: *mut ()) -> Self {
        THREAD_DATA.set(data);
        Fiber {
            data,
            kind: FiberKind::Thread,
        }
    }

    /// Suspends the calling context and transfers control to `target`.
    ///
    /// Returns once control comes back to the caller.
    ///
    /// # Safety
    ///
    /// - If `target` is a stack fiber, it must be suspended (not running on
    ///   any thread) and its entry function must not have returned.
    /// - If `target` is a thread fiber, the caller must be running on a stack
    ///   fiber; control returns to the context that resumed it.
    pub unsafe fn switch_to(target: &Fiber) {
        match &target.kind {
            FiberKind::Stack { coroutine, .. } => {
                let previous = CURRENT_FIBER.replace(target as *const Fiber);
                // SAFETY: the caller guarantees nobody else is running `target`.
                let result = unsafe { (*coroutine.get()).resume(()) };
                CURRENT_FIBER.set(previous);

                if let CoroutineResult::Return(()) = result {
                    tracing::warn!("fiber entry function returned; it must not be resumed again");
                }
            }
            FiberKind::Thread => {
                let current = CURRENT_FIBER.get();
                debug_assert!(
                    !current.is_null(),
                    "switch to a thread fiber from outside any stack fiber"
                );
                if current.is_null() {
                    return;
                }

                // SAFETY: `current` was published by the `resume` that is
                // running us and stays valid until we suspend.
                let yielder = unsafe { (*current).yielder() };
                debug_assert!(!yielder.is_null());
                // SAFETY: the yielder lives on our own stack for the
                // coroutine's whole lifetime.
                unsafe { (*yielder).suspend(()) };
            }
        }
    }

    /// Data pointer of the context currently running on this thread.
    ///
    /// Inside a stack fiber this is that fiber's data; otherwise it is the
    /// data given to [`convert_current_thread`](Self::convert_current_thread)
    /// (null if the thread was never converted).
    #[inline(never)]
    pub fn get_data() -> *mut () {
        let current = CURRENT_FIBER.get();
        if current.is_null() {
            THREAD_DATA.get()
        } else {
            // SAFETY: see `switch_to`; `current` is running us.
            unsafe { (*current).data }
        }
    }

    /// Whether the caller is executing on a stack fiber.
    #[inline(never)]
    pub fn is_running_in_fiber() -> bool {
        !CURRENT_FIBER.get().is_null()
    }

    /// The data pointer this context was created with.
    pub fn data(&self) -> *mut () {
        self.data
    }

    /// Rounded stack size for stack fibers, `None` for thread fibers.
    pub fn stack_size(&self) -> Option<usize> {
        match &self.kind {
            FiberKind::Stack { stack_size, .. } => Some(*stack_size),
            FiberKind::Thread => None,
        }
    }

    fn yielder(&self) -> *const Yielder<(), ()> {
        match &self.kind {
            FiberKind::Stack { yielder, .. } => yielder.get(),
            FiberKind::Thread => ptr::null(),
        }
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("data", &self.data)
            .field("stack_size", &self.stack_size())
            .finish()
    }
}
