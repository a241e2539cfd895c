use std::io::{self, BufRead};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use triggered::{Listener, Trigger};

/// Pause of the reader thread after a failed read
const READ_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Process-wide termination signal, fired by SIGINT/SIGTERM or by hand
#[derive(Clone)]
pub struct Shutter {
    pub trigger: Trigger,
    pub signal: Listener,
}

impl Shutter {
    /// There should only be one of these per process
    pub fn new() -> Result<Self, ctrlc::Error> {
        let (trigger, signal) = triggered::trigger();
        let ctrlc_trigger = trigger.clone();
        ctrlc::set_handler(move || {
            info!("got termination signal");
            ctrlc_trigger.trigger();
        })?;

        Ok(Self { trigger, signal })
    }
}

/// Lines of a blocking reader, read on a dedicated thread.
///
/// A read that never completes only holds that thread, so the runtime can still shut down and
/// the process exit while the operator's terminal is idle. The thread ends at end of input or
/// once the reader is dropped and the next line arrives.
pub struct LineReader {
    lines: UnboundedReceiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
}

impl LineReader {
    pub fn spawn<R: BufRead + Send + 'static>(mut input: R) -> io::Result<Self> {
        let (tx, lines) = unbounded_channel();
        thread::Builder::new().name("input-reader".to_string()).spawn(move || loop {
            let mut line = Vec::new();
            let res = match input.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => tx.send(Ok(line)),
                Err(e) => {
                    let res = tx.send(Err(e));
                    thread::sleep(READ_ERROR_DELAY);
                    res
                }
            };
            if res.is_err() {
                debug!("input reader dropped");
                break;
            }
        })?;
        Ok(LineReader { lines, pending: Vec::new(), pos: 0 })
    }
}

impl AsyncRead for LineReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.pos == this.pending.len() {
            match ready!(this.lines.poll_recv(cx)) {
                // end of input
                None => return Poll::Ready(Ok(())),
                Some(Err(e)) => return Poll::Ready(Err(e)),
                Some(Ok(line)) => {
                    this.pending = line;
                    this.pos = 0;
                }
            }
        }
        let n = buf.remaining().min(this.pending.len() - this.pos);
        buf.put_slice(&this.pending[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}
