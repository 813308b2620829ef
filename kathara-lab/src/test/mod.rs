// LabForge: Kathara lab compiler written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::process::{CmdError, CmdOutput, CommandRunner, Invocation};


/// Runner that records every invocation and answers with queued outputs. Once the queue is
/// empty, every invocation succeeds with empty output.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeRunner {
    calls: Arc<Mutex<Vec<Invocation>>>,
    responses: Arc<Mutex<VecDeque<CmdOutput>>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, stdout: &str, exit_code: i32) -> &Self {
        self.responses.lock().unwrap().push_back(CmdOutput {
            stdout: stdout.as_bytes().to_vec(),
            stderr: if exit_code == 0 {
                Vec::new()
            } else {
                b"boom".to_vec()
            },
            exit_code,
        });
        self
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|i| {
                std::iter::once(i.program.clone())
                    .chain(i.args.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: Invocation) -> Result<CmdOutput, CmdError> {
        self.calls.lock().unwrap().push(invocation);
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}
