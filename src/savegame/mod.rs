//! Save game support for the script system
//!
//! A save file is a sequence of chunks, each a 4-byte id, a little-endian
//! 32-bit payload size and the payload. The script system contributes
//! two: "SAGA" holds the thread list and "SDTA" the data segment. Hosts
//! that keep their own save file can write and read the chunks directly
//! with [`save::save_threads`] and friends.

pub mod chunks;
pub mod restore;
pub mod save;

pub use restore::RestoreGame;
pub use save::SaveGame;
