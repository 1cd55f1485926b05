// src/kernel/driver/console.rs
//! コンソール抽象化レイヤー
//!
//! トレイトベースで文字出力を抽象化し、具体的なドライバ（VGA テキストモード、
//! シリアル）から独立したインターフェースを提供します。

use alloc::string::String;
use alloc::vec::Vec;

/// VGA 形式のテキスト属性（上位 4 ビットが背景色、下位 4 ビットが前景色）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct TextAttr(u8);

impl TextAttr {
    /// 生の属性値から作成
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// 生の属性値
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

/// 文字出力デバイス
///
/// ユーザープロセスの `write` はこのトレイトを通じて 1 バイトずつ出力します。
pub trait Console {
    /// 1 文字を属性付きで出力
    fn put_char(&mut self, byte: u8, attr: TextAttr);
}

/// 出力されたセルをすべて記録するコンソール
///
/// ホスト上でのテストや、出力のキャプチャに使用します。
#[derive(Debug, Default, Clone)]
pub struct RecordingConsole {
    cells: Vec<(u8, TextAttr)>,
}

impl RecordingConsole {
    /// 空のコンソールを作成
    #[must_use]
    pub const fn new() -> Self {
        Self { cells: Vec::new() }
    }

    /// 出力されたセル
    #[must_use]
    pub fn cells(&self) -> &[(u8, TextAttr)] {
        &self.cells
    }

    /// 出力されたバイト列
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.cells.iter().map(|&(byte, _)| byte).collect()
    }

    /// 出力をテキストとして取得（不正な UTF-8 は置換）
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// 記録を消去
    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

impl Console for RecordingConsole {
    fn put_char(&mut self, byte: u8, attr: TextAttr) {
        self.cells.push((byte, attr));
    }
}
