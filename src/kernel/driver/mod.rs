//! デバイスドライバモジュール

pub mod console;

pub use console::{Console, RecordingConsole, TextAttr};
