// urraca is a deduplicating, content-addressed snapshot engine
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use thiserror::Error;

/// Error kinds that callers need to tell apart from generic I/O failures.
/// Everything else travels as a plain `anyhow` error with context.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("manifest {0} not found")]
    NotFound(String),

    #[error("manifest {0} is not of type '{1}'")]
    WrongType(String, String),

    #[error("invalid {what}: {reason}")]
    Invalid { what: String, reason: String },

    #[error("no policy defined for {0}")]
    PolicyNotFound(String),

    #[error("multiple policies defined for {0}")]
    AmbiguousPolicy(String),
}

impl StoreError {
    pub fn invalid(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            what: what.into(),
            reason: reason.into(),
        }
    }
}
