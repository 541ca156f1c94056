//! Chat-side presentation: formats translated events and delivers them to
//! the console. A real chat surface plugs in through the same delivery-fn
//! interface the console adapter uses.

use crate::config::DisplayMode;
use crate::queue::{BroadcastMessage, DeliveryResult};
use shared::ItemImportance;

const COLOR_NEUTRAL: &str = "\u{1b}[0m";
const COLOR_GOLD: &str = "\u{1b}[3;33m";
const COLOR_WHITE: &str = "\u{1b}[3;37m";
const COLOR_MAGENTA: &str = "\u{1b}[3;35m";
const COLOR_BLUE: &str = "\u{1b}[3;34m";
const COLOR_RED: &str = "\u{1b}[3;31m";
const COLOR_TEAL: &str = "\u{1b}[3;36m";

type FormatFn = fn(&BroadcastMessage, bool) -> String;

/// Delivery adapter writing formatted events to stdout.
pub struct ConsoleChat {
    formatter: FormatFn,
}

impl ConsoleChat {
    pub fn new(mode: DisplayMode) -> Self {
        let formatter = match mode {
            DisplayMode::Plain => format_plain,
            DisplayMode::Mono => format_mono,
            DisplayMode::Color => format_color,
        };
        Self { formatter }
    }

    pub fn format(&self, message: &BroadcastMessage) -> String {
        let self_find = message.sender == message.receiver;
        (self.formatter)(message, self_find)
    }

    pub fn deliver(&self, message: &BroadcastMessage) -> DeliveryResult {
        println!("{}", self.format(message));
        Ok(())
    }
}

fn format_plain(msg: &BroadcastMessage, self_find: bool) -> String {
    if self_find {
        return format!(
            "[{}] found their <{}> ({})",
            msg.receiver, msg.item, msg.location
        );
    }

    format!(
        "[{}] sent <{}> to {{{}}} ({})",
        msg.sender, msg.item, msg.receiver, msg.location
    )
}

fn format_mono(msg: &BroadcastMessage, self_find: bool) -> String {
    format!("`{}`", format_plain(msg, self_find))
}

fn importance_color(importance: ItemImportance) -> &'static str {
    match importance {
        ItemImportance::Normal => COLOR_WHITE,
        ItemImportance::Progression => COLOR_MAGENTA,
        ItemImportance::Helpful => COLOR_BLUE,
        ItemImportance::Trap => COLOR_RED,
    }
}

fn format_color(msg: &BroadcastMessage, self_find: bool) -> String {
    let item_color = importance_color(msg.importance);

    if self_find {
        return format!(
            "{COLOR_GOLD}[{}]{COLOR_NEUTRAL} found their {item_color}<{}> {COLOR_TEAL}({}){COLOR_NEUTRAL}",
            msg.receiver, msg.item, msg.location
        );
    }

    format!(
        "{COLOR_GOLD}[{}]{COLOR_NEUTRAL} sent {item_color}<{}>{COLOR_NEUTRAL} to {COLOR_GOLD}{{{}}} {COLOR_TEAL}({}){COLOR_NEUTRAL}",
        msg.sender, msg.item, msg.receiver, msg.location
    )
}
