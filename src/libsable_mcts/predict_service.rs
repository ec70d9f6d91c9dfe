// Copyright 2024 the sable authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use sable_chess::labels;

use crate::predict::{PredictError, PredictResponse, Predictor};

enum Request {
    Predict {
        planes: Vec<f32>,
        reply: Sender<Result<PredictResponse, PredictError>>,
    },
    Shutdown,
}

/// The batching facade in front of the executor. Workers submit one
/// position at a time; a dispatcher thread coalesces up to `batch_size`
/// outstanding submissions into a single executor call.
pub struct PredictService {
    queue: Sender<Request>,
    closed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    is_policy_map: bool,
}

/// A cheap handle workers keep to submit requests with.
#[derive(Clone)]
pub struct PredictHandle {
    queue: Sender<Request>,
    closed: Arc<AtomicBool>,
    is_policy_map: bool,
}

impl PredictService {
    /// Wrap `predictor` and spawn the dispatcher. Fails with
    /// `ShapeMismatch` when the policy head does not cover the label space
    /// of its encoding.
    pub fn new(
        predictor: Box<dyn Predictor>,
        batch_size: usize
    ) -> Result<Self, PredictError>
    {
        let expected = if predictor.is_policy_map() {
            labels::POLICY_MAP_WIDTH
        } else {
            labels::dense_width()
        };

        if predictor.policy_width() != expected {
            return Err(PredictError::ShapeMismatch {
                expected,
                actual: predictor.policy_width()
            });
        }

        let (tx, rx) = unbounded();
        let is_policy_map = predictor.is_policy_map();
        let handle = thread::Builder::new()
            .name("sable_predict".into())
            .spawn(move || dispatch(predictor, rx, batch_size.max(1)))
            .expect("could not spawn the predict dispatcher");

        Ok(Self {
            queue: tx,
            closed: Arc::new(AtomicBool::new(false)),
            handle: Some(handle),
            is_policy_map
        })
    }

    pub fn handle(&self) -> PredictHandle {
        PredictHandle {
            queue: self.queue.clone(),
            closed: self.closed.clone(),
            is_policy_map: self.is_policy_map
        }
    }

    /// Shut the facade down. Requests still queued are answered with
    /// `Closed`, as are all submissions after this point.
    pub fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.queue.send(Request::Shutdown);

            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for PredictService {
    fn drop(&mut self) {
        self.close();
    }
}

impl PredictHandle {
    pub fn is_policy_map(&self) -> bool {
        self.is_policy_map
    }

    /// Submit one encoded position and block until its response arrives.
    /// Blocked submitters do not hold up other workers; the dispatcher
    /// keeps forming batches from whatever is queued.
    pub fn predict(&self, planes: Vec<f32>) -> Result<PredictResponse, PredictError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PredictError::Closed);
        }

        let (reply, response) = bounded(1);

        self.queue.send(Request::Predict { planes, reply })
            .map_err(|_| PredictError::Closed)?;

        response.recv().map_err(|_| PredictError::Closed)?
    }
}

fn dispatch(predictor: Box<dyn Predictor>, rx: Receiver<Request>, batch_size: usize) {
    let mut shutting_down = false;

    while !shutting_down {
        let first = match rx.recv() {
            Ok(Request::Predict { planes, reply }) => (planes, reply),
            Ok(Request::Shutdown) | Err(_) => break,
        };
        let mut pending = vec! [first];

        // coalesce whatever else is already queued, up to the batch size
        while pending.len() < batch_size {
            match rx.try_recv() {
                Ok(Request::Predict { planes, reply }) => pending.push((planes, reply)),
                Ok(Request::Shutdown) => {
                    shutting_down = true;
                    break;
                },
                Err(_) => break,
            }
        }

        let mut planes = Vec::with_capacity(pending.iter().map(|(p, _)| p.len()).sum());

        for (chunk, _) in pending.iter() {
            planes.extend_from_slice(chunk);
        }

        match predictor.predict_batch(&planes, pending.len()) {
            Ok(responses) => {
                for ((_, reply), response) in pending.into_iter().zip(responses) {
                    let _ = reply.send(Ok(response));
                }
            },
            Err(reason) => {
                for (_, reply) in pending {
                    let _ = reply.send(Err(reason.clone()));
                }
            }
        }
    }

    // answer everything that raced with the shutdown
    while let Ok(request) = rx.try_recv() {
        if let Request::Predict { reply, .. } = request {
            let _ = reply.send(Err(PredictError::Closed));
        }
    }
}
