// Console input and output, backed by memory.
// Input is queued by the host with push_input(); reads are line
// at a time and return 0 once the queue is empty.
// Implements special input characters:
//   newline -- end of line
//   control-d -- end of file

use crate::error::Result;
use crate::file::{Device, Major};
use crate::spinlock::Mutex;
use std::collections::VecDeque;

// Control-x
const fn ctrl(x: u8) -> u8 {
    x - b'@'
}

#[derive(Debug)]
pub struct Console {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(VecDeque::new(), "cons.in"),
            output: Mutex::new(Vec::new(), "cons.out"),
        }
    }

    // Queue bytes as if typed at the keyboard.
    pub fn push_input(&self, bytes: &[u8]) {
        let mut input = self.input.lock();
        input.extend(bytes.iter().map(|&c| if c == b'\r' { b'\n' } else { c }));
    }

    // Everything written so far, draining the buffer.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

impl Device for Console {
    //
    // user read()s from the console go here.
    // copy (up to) a whole input line to dst.
    //
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut input = self.input.lock();
        let mut n = 0;
        while n < dst.len() {
            let Some(c) = input.pop_front() else {
                break;
            };
            if c == ctrl(b'D') {
                if n > 0 {
                    // Save ^D for next time, to make sure
                    // caller gets a 0-bytes result.
                    input.push_front(c);
                }
                break;
            }
            dst[n] = c;
            n += 1;
            if c == b'\n' {
                // a whole line has arrived.
                break;
            }
        }
        Ok(n)
    }

    //
    // user write()s to the console go here.
    //
    fn write(&self, src: &[u8]) -> Result<usize> {
        self.output.lock().extend_from_slice(src);
        Ok(src.len())
    }

    fn major(&self) -> Major {
        Major::Console
    }
}
