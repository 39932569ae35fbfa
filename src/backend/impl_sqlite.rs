// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

mod error;
mod instance;
mod session;
mod table;

pub use error::ErrorImpl;
pub use instance::{
    InstanceBuilderImpl,
    InstanceImpl,
};
pub use session::SessionImpl;
pub use table::TableImpl;

/// Quote an identifier for use in a SQL statement.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Run a pragma, discarding whatever rows it reports back. Some pragmas answer
/// an assignment with the new value and some stay silent.
pub(crate) fn run_pragma(connection: &rusqlite::Connection, pragma: &str) -> Result<(), ErrorImpl> {
    let mut stmt = connection.prepare(pragma)?;
    let mut rows = stmt.query(rusqlite::params![])?;
    while rows.next()?.is_some() {}
    Ok(())
}
