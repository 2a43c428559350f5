//! Incremental `text/event-stream` decoding.

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Buffers partial chunks and yields complete events. Bytes stay raw until a
/// whole frame is in, so neither a split character nor a split line ending
/// can corrupt it.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed raw bytes; returns every event completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((body, consumed)) = frame_bounds(&self.buffer) {
            let mut frame: Vec<u8> = self.buffer.drain(..consumed).collect();
            frame.truncate(body);
            match String::from_utf8(frame) {
                Ok(text) => events.extend(parse_frame(&text)),
                Err(e) => tracing::warn!("Skipping event frame that is not UTF-8: {}", e),
            }
        }
        events
    }
}

/// Locate the first blank line. Returns the length of the frame body before
/// it and the number of bytes up to and including it. Accepts `\n`, `\r\n`
/// and lone `\r` line endings; a trailing `\r` waits for the next byte.
fn frame_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    let mut i = 0;
    while i < buffer.len() {
        let eol = match buffer[i] {
            b'\n' => 1,
            b'\r' if i + 1 == buffer.len() => return None,
            b'\r' if buffer[i + 1] == b'\n' => 2,
            b'\r' => 1,
            _ => {
                i += 1;
                continue;
            }
        };
        if i == line_start {
            return Some((line_start, i + eol));
        }
        i += eol;
        line_start = i;
    }
    None
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    // `\r\n` yields an empty piece between the two, which matches nothing.
    for line in frame.split(['\r', '\n']) {
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data_lines.join("\n"),
    })
}
