// Frame storage
//
// Every task owns one arena sized at compile time. Frames for the root
// coroutine and every nested call are carved from it; nothing here
// touches a heap.

pub mod arena;
pub mod debug;

pub use arena::{Arena, LinearArena, MAX_ALIGN, Region, StackArena};
pub use debug::{ArenaStats, DebugArena};
