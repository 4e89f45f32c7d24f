//! User-defined type descriptors: classes, interfaces, enums, and the
//! compiled-function representation they share (`spec.md` §4.2, §4.4).

pub mod class;
pub mod enum_;
pub mod function;
pub mod interface;

pub use class::{Annotations, Class, FieldDef};
pub use enum_::{EnumDef, EnumMemberDef};
pub use function::{Function, Param, Signature, UpvalueDescriptor};
pub use interface::{Interface, MethodSignature};
