//! バックエンドとのワイヤープロトコル
//!
//! エンベロープ/イベントのserdeモデルと、フレームのデコード・
//! ディスパッチを提供する。

pub mod decoder;
pub mod events;

pub use decoder::{decode_frame, DecoderMetrics, Dispatcher};
pub use events::{ChatEvent, DisplayMessage, EmoteOccurrence, Envelope};
