pub mod call_tree;
pub mod profile;
pub mod string_table;
pub mod tables;
pub mod thread;

pub use call_tree::{CallNode, CallTree, FuncStackTimes};
pub use profile::Profile;
pub use string_table::StringTable;
pub use tables::{
    DateTable, FuncTable, IndexIntoFuncTable, IndexIntoLibs, IndexIntoStackTable,
    IndexIntoStringTable, Lib, SampleTable, StackOrderError, StackTable,
};
pub use thread::{Thread, ThreadId, ThreadParts};
