// Status lines shown to the sender
// (c) 2024 Ross Younger

use std::fmt::Write as _;

use anstyle::Style;
use tokio::sync::mpsc;

use crate::{
    cli::styles::{CALL_OUT, ERROR, INFO, SUCCESS, WARNING},
    relay::TransferReport,
    util::stats::transfer_summary,
};

/// How to invoke us, shown when the sender gets the arguments wrong
pub(crate) const USAGE: &str = "usage: ssh <host> [MEDIA-TYPE | EXTENSION] < file";

/// Writes human-readable status lines back to the sender.
///
/// Lines are queued; whoever owns the receiving end forwards them to the sender's
/// terminal. Once that end has gone, output is silently discarded.
#[derive(Debug, Clone)]
pub struct Console {
    tx: mpsc::UnboundedSender<String>,
    colour: bool,
}

impl Console {
    #[must_use]
    pub fn new(colour: bool) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, colour }, rx)
    }

    fn styled(&self, style: Style, text: &str) -> String {
        if self.colour {
            format!("{style}{text}{style:#}")
        } else {
            text.to_string()
        }
    }

    fn send(&self, msg: String) {
        let _ = self.tx.send(msg);
    }

    pub fn welcome(&self, user: &str) {
        let mut msg = self.styled(INFO.dimmed(), "sshpipe verified user");
        msg.push_str("\n\n");
        msg.push_str(&self.styled(WARNING, &format!("Welcome {user}!")));
        msg.push('\n');
        msg.push_str(&self.styled(
            SUCCESS,
            "Your connection stays open until someone downloads your file.",
        ));
        msg.push('\n');
        self.send(msg);
    }

    pub fn share_url(&self, url: &str) {
        let mut msg = String::from("\n");
        msg.push_str(&self.styled(SUCCESS, "Share link:"));
        let _ = writeln!(msg, "\n{}\n", self.styled(CALL_OUT, url));
        self.send(msg);
    }

    pub fn transfer_done(&self, report: &TransferReport) {
        let mut msg = String::from("\n");
        msg.push_str(&self.styled(SUCCESS, "Data transferred with no errors."));
        msg.push('\n');
        msg.push_str(&self.styled(WARNING, &transfer_summary(report.bytes, report.elapsed)));
        msg.push('\n');
        self.send(msg);
    }

    pub fn usage(&self) {
        self.send(format!("{USAGE}\n"));
    }

    pub fn error(&self, err: &dyn std::fmt::Display) {
        let line = self.styled(ERROR, &format!("Error: {err}"));
        self.send(format!("{line}\n"));
    }
}

#[cfg(test)]
mod test {
    use assertables::{assert_contains, assert_contains_as_result};
    use super::Console;
    use crate::{relay::TransferReport, tunnel::FileMetadata};
    use std::time::Duration;

    fn collect(mut rx: tokio::sync::mpsc::UnboundedReceiver<String>) -> String {
        let mut out = String::new();
        while let Ok(s) = rx.try_recv() {
            out.push_str(&s);
        }
        out
    }

    #[test]
    fn plain() {
        let (c, rx) = Console::new(false);
        c.welcome("alice");
        c.share_url("http://localhost:8080/?id=abc");
        c.error(&"boom");
        drop(c);
        let out = collect(rx);
        assert_contains!(out, "Welcome alice!");
        assert_contains!(out, "Share link:\nhttp://localhost:8080/?id=abc\n");
        assert!(out.ends_with("Error: boom\n"));
        assert!(!out.contains('\x1b'));
    }

    #[test]
    fn summary() {
        let (c, rx) = Console::new(false);
        c.transfer_done(&TransferReport {
            bytes: 2_000_000,
            elapsed: Some(Duration::from_secs(2)),
            metadata: FileMetadata {
                content_type: "image/png".into(),
                file_name: "sshpipe.png".into(),
            },
        });
        let out = collect(rx);
        assert_contains!(out, "Data transferred with no errors.");
        assert_contains!(out, "Transferred 2MB in");
        assert_contains!(out, "average 8Mbit/s");
    }

    #[test]
    fn coloured() {
        let (c, rx) = Console::new(true);
        c.error(&"boom");
        let out = collect(rx);
        assert!(out.starts_with('\x1b'));
        assert!(out.contains("Error: boom"));
    }

    #[test]
    fn discarded_after_receiver_drops() {
        let (c, rx) = Console::new(false);
        drop(rx);
        c.usage();
    }
}
