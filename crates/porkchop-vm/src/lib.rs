//! porkchop-vm - The virtual machine.
//!
//! A stack machine executing the in-memory [`porkchop_gen::Assembly`]
//! form. Each activation owns an operand stack with a parallel bit-vector
//! of reference tags; the heap is collected by a tracing mark-and-sweep
//! collector whose roots are the tagged slots of every live frame plus a
//! transient temporaries list. Coroutines are suspended frames owned by
//! heap objects.

pub mod error;
pub mod external;
pub mod frame;
pub mod heap;
pub mod object;
pub mod value;
pub mod vm;

pub use error::VmError;
pub use value::{ObjRef, Value};
pub use vm::{Env, Vm};
