//! Shared UI icons.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static CART: Emoji<'_, '_> = Emoji("🛒 ", "[CART]");
pub static KEY: Emoji<'_, '_> = Emoji("🔑 ", "[INPUT]");
pub static PIVOT: Emoji<'_, '_> = Emoji("🔄 ", "[RECOVER]");
