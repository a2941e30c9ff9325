use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskAction {
    Add,
    Remove,
    Change,
}

impl DiskAction {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "add" => Some(DiskAction::Add),
            "remove" => Some(DiskAction::Remove),
            "change" => Some(DiskAction::Change),
            _ => None,
        }
    }
}

impl fmt::Display for DiskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskAction::Add => write!(f, "add"),
            DiskAction::Remove => write!(f, "remove"),
            DiskAction::Change => write!(f, "change"),
        }
    }
}

/// A kernel uevent for a whole disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiskEvent {
    pub dev_name: String,
    pub action: DiskAction,
    pub major: String,
    pub minor: String,
    pub subsystem: String,
    pub seq_num: u64,
    /// The property block as received.
    pub content: String,
}

/// Parses one `udevadm monitor -p` property block. Partitions and other
/// non-disk devices yield `None`, as do actions other than add/remove/change.
pub fn parse_event_block(block: &str) -> Option<DiskEvent> {
    let props: HashMap<&str, &str> = block
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .collect();

    if props.get("DEVTYPE").copied() != Some("disk") {
        return None;
    }
    let action = DiskAction::parse(props.get("ACTION")?)?;
    let dev_name = props.get("DEVNAME")?;
    let dev_name = if dev_name.starts_with("/dev/") {
        dev_name.to_string()
    } else {
        format!("/dev/{}", dev_name)
    };

    Some(DiskEvent {
        dev_name,
        action,
        major: props.get("MAJOR").copied().unwrap_or_default().to_string(),
        minor: props.get("MINOR").copied().unwrap_or_default().to_string(),
        subsystem: props.get("SUBSYSTEM").copied().unwrap_or_default().to_string(),
        seq_num: props.get("SEQNUM").and_then(|s| s.parse().ok()).unwrap_or(0),
        content: block.to_string(),
    })
}

/// Reassembles blank-line delimited blocks from a line stream.
#[derive(Debug, Default)]
pub struct EventSplitter {
    lines: Vec<String>,
}

impl EventSplitter {
    /// Feeds one line; returns the finished event when `line` closes a block.
    pub fn push(&mut self, line: &str) -> Option<DiskEvent> {
        if !line.trim().is_empty() {
            self.lines.push(line.to_string());
            return None;
        }
        if self.lines.is_empty() {
            return None;
        }
        let block = self.lines.join("\n");
        self.lines.clear();
        parse_event_block(&block)
    }
}
