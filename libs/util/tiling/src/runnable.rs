// This file is part of Regolith.
//
// Regolith is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Regolith is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Regolith.  If not, see <http://www.gnu.org/licenses/>.
use crate::error::{Error, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation token. Long-running operations poll it at tile
/// boundaries and before each driver flush; external timeouts trip the same
/// token. Cloned tokens share one flag.
#[derive(Clone, Debug, Default)]
pub struct Runnable {
    cancelled: Arc<AtomicBool>,
}

impl Runnable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }

    /// Err(Cancelled) once the token has tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(Error::Cancelled)
        }
    }
}
