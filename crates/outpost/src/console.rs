//! The operator console and the rcon redirect scope.
//!
//! Everything a command prints goes through [`Console::print`]. Normally
//! that is a log line under the `outpost::console` target. While a
//! [`RedirectScope`] is alive the text is captured instead and, when the
//! scope ends, sent back to the rcon requester as `print` packets. The
//! scope is a guard: it flushes and restores local output on every exit
//! path, including early returns from a failing command.

use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};

use outpost_protocol::{MAX_MSGLEN, WireCodec};

/// Largest text captured into one redirected `print` packet.
pub const REDIRECT_CHUNK: usize = MAX_MSGLEN - 16;

#[derive(Debug)]
struct Redirect {
    target: SocketAddr,
    buffer: String,
}

/// Operator console output.
#[derive(Debug, Default)]
pub struct Console {
    redirect: Option<Redirect>,
    /// Packets produced by finished redirects, waiting to be sent.
    outbound: Vec<(SocketAddr, Vec<u8>)>,
    /// Local output kept for inspection, when enabled.
    transcript: Option<String>,
}

impl Console {
    /// A console that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// A console that also keeps everything printed locally.
    pub fn with_transcript() -> Self {
        Self {
            transcript: Some(String::new()),
            ..Self::default()
        }
    }

    /// Prints `text` to the current destination.
    pub fn print(&mut self, text: &str) {
        let Some(redirect) = self.redirect.as_mut() else {
            for line in text.lines().filter(|l| !l.is_empty()) {
                tracing::info!(target: "outpost::console", "{line}");
            }
            if let Some(transcript) = self.transcript.as_mut() {
                transcript.push_str(text);
            }
            return;
        };

        let limit = REDIRECT_CHUNK - 1;
        if !redirect.buffer.is_empty() && redirect.buffer.len() + text.len() > limit {
            let full = std::mem::take(&mut redirect.buffer);
            self.outbound.push((redirect.target, print_packet(&full)));
        }
        // text longer than a packet goes out in pieces; the buffer is empty here
        let mut rest = text;
        while rest.len() > limit {
            let mut cut = limit;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            self.outbound.push((redirect.target, print_packet(&rest[..cut])));
            rest = &rest[cut..];
        }
        redirect.buffer.push_str(rest);
    }

    /// Starts capturing output for `target`. Output goes back to the
    /// console when the returned scope is dropped.
    pub fn redirect(&mut self, target: SocketAddr) -> RedirectScope<'_> {
        self.finish_redirect();
        self.redirect = Some(Redirect {
            target,
            buffer: String::new(),
        });
        RedirectScope { console: self }
    }

    /// Whether a redirect is in progress.
    pub fn is_redirected(&self) -> bool {
        self.redirect.is_some()
    }

    /// Drains the packets finished redirects produced.
    pub fn take_outbound(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut self.outbound)
    }

    /// Drains the local transcript, if one is kept.
    pub fn take_transcript(&mut self) -> String {
        self.transcript.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn finish_redirect(&mut self) {
        if let Some(redirect) = self.redirect.take() {
            if !redirect.buffer.is_empty() {
                self.outbound
                    .push((redirect.target, print_packet(&redirect.buffer)));
            }
        }
    }
}

fn print_packet(text: &str) -> Vec<u8> {
    WireCodec::encode_connectionless_text(&format!("print\n{text}"))
}

/// Guard returned by [`Console::redirect`].
///
/// Dereferences to the console, so commands print through it as usual.
#[derive(Debug)]
pub struct RedirectScope<'a> {
    console: &'a mut Console,
}

impl Deref for RedirectScope<'_> {
    type Target = Console;

    fn deref(&self) -> &Console {
        self.console
    }
}

impl DerefMut for RedirectScope<'_> {
    fn deref_mut(&mut self) -> &mut Console {
        self.console
    }
}

impl Drop for RedirectScope<'_> {
    fn drop(&mut self) {
        self.console.finish_redirect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "10.0.0.1:27960".parse().unwrap()
    }

    fn text_of(packet: &[u8]) -> String {
        String::from_utf8_lossy(&packet[4..]).into_owned()
    }

    #[test]
    fn test_local_output_goes_to_transcript() {
        let mut console = Console::with_transcript();
        console.print("hello\n");
        assert_eq!(console.take_transcript(), "hello\n");
        assert!(console.take_outbound().is_empty());
    }

    #[test]
    fn test_redirect_captures_and_flushes_on_drop() {
        let mut console = Console::with_transcript();
        {
            let mut scope = console.redirect(addr());
            scope.print("line one\n");
            scope.print("line two\n");
            assert!(scope.is_redirected());
        }
        assert!(!console.is_redirected());
        assert_eq!(console.take_transcript(), "");

        let out = console.take_outbound();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, addr());
        assert_eq!(text_of(&out[0].1), "print\nline one\nline two\n");
    }

    #[test]
    fn test_redirect_restored_after_early_return() {
        fn failing(console: &mut Console) -> Result<(), ()> {
            let mut scope = console.redirect(addr());
            scope.print("partial\n");
            Err(())
        }

        let mut console = Console::new();
        assert!(failing(&mut console).is_err());
        assert!(!console.is_redirected());
        assert_eq!(console.take_outbound().len(), 1);
    }

    #[test]
    fn test_empty_redirect_sends_nothing() {
        let mut console = Console::new();
        drop(console.redirect(addr()));
        assert!(console.take_outbound().is_empty());
    }

    #[test]
    fn test_long_output_is_split_into_packets() {
        let mut console = Console::new();
        let line = "x".repeat(1000) + "\n";
        {
            let mut scope = console.redirect(addr());
            for _ in 0..100 {
                scope.print(&line);
            }
        }
        let out = console.take_outbound();
        assert!(out.len() >= 3);
        for (_, packet) in &out {
            assert!(packet.len() <= REDIRECT_CHUNK + 10);
        }
        let total: usize = out.iter().map(|(_, p)| text_of(p).len() - "print\n".len()).sum();
        assert_eq!(total, 100 * line.len());
    }

    #[test]
    fn test_single_oversized_print_is_split() {
        let mut console = Console::new();
        let text = "é".repeat(REDIRECT_CHUNK) + "end\n";
        {
            let mut scope = console.redirect(addr());
            scope.print("first\n");
            scope.print(&text);
        }
        let out = console.take_outbound();
        assert_eq!(text_of(&out[0].1), "print\nfirst\n");
        for (_, packet) in &out {
            assert!(packet.len() <= REDIRECT_CHUNK + 10);
            assert!(text_of(packet).len() > "print\n".len());
        }
        let joined: String = out[1..]
            .iter()
            .map(|(_, p)| text_of(p)["print\n".len()..].to_string())
            .collect();
        assert_eq!(joined, text);
    }
}
