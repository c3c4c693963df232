// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use log::debug;
use std::io;
use std::process::Output;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;

/// Feed `input` to the child's stdin while collecting its output.
///
/// Writing and reading run concurrently so neither side can fill a pipe and stall the other.
/// A child that exits without draining stdin is not an error.
pub async fn feed_and_wait(mut child: Child, input: &[u8]) -> io::Result<Output> {
    let stdin = child.stdin.take();
    let write = async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        if !input.is_empty() {
            stdin.write_all(input).await?;
        }
        stdin.shutdown().await
    };

    let (written, output) = tokio::join!(write, child.wait_with_output());
    let output = output?;
    match written {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("child exited before reading all of stdin");
        }
        other => other?,
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn(line: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(line)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn sh")
    }

    #[actix_web::test]
    async fn unread_stdin_is_not_an_error() {
        let input = vec![b'x'; 512 * 1024];
        let output = feed_and_wait(spawn("echo ok"), &input).await.expect("output");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"ok\n");
    }

    #[actix_web::test]
    async fn large_output_and_input_do_not_stall() {
        let input = vec![b'y'; 256 * 1024];
        let output = feed_and_wait(spawn("head -c 200000 /dev/zero; cat"), &input)
            .await
            .expect("output");
        assert_eq!(output.stdout.len(), 200_000 + input.len());
    }

    #[actix_web::test]
    async fn stdin_is_closed_after_the_input() {
        let output = feed_and_wait(spawn("cat"), b"hello").await.expect("output");
        assert_eq!(output.stdout, b"hello");
    }
}
