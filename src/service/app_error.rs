// Copyright 2025 jonefeewang@gmail.com
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

use crate::network::FrameError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Accept error = {0}")]
    Accept(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// protocol errors, fatal to one connection only
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("unknown message id: {0}")]
    UnknownMessage(u16),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("payload of {0} bytes does not fit in one frame")]
    PayloadTooLarge(usize),

    /// session errors
    #[error("session {0} is not running")]
    SessionStopped(u64),

    #[error("send queue of session {0} is full")]
    SendQueueFull(u64),
}

impl AppError {
    /// Protocol violations as opposed to plain disconnects or I/O trouble.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            AppError::Frame(_) | AppError::UnknownMessage(_) | AppError::MalformedPayload(_)
        )
    }
}
