//! Transactions as RAII guards.

use std::ops::{Deref, DerefMut};

use crate::error::Result;

use super::Conn;

impl Conn {
    /// Open a transaction guard. Dropping it without a commit rolls back.
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        self.exec("begin")?;
        Ok(Transaction {
            conn: self,
            done: false,
        })
    }

    /// Run a closure inside a transaction.
    ///
    /// COMMIT on success, ROLLBACK when the closure errors or unwinds.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                // Rollback failure is secondary to the original error
                let _ = tx.rollback();
                Err(err)
            }
        }
    }
}

/// An open transaction.
///
/// Derefs to [`Conn`], so every connection operation is available inside
/// the transaction. If neither [`Transaction::commit`] nor
/// [`Transaction::rollback`] ran by drop time (early return, panic), the
/// drop handler rolls back.
pub struct Transaction<'a> {
    conn: &'a mut Conn,
    done: bool,
}

impl Transaction<'_> {
    /// Commit the transaction.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.conn.exec("commit")?;
        Ok(())
    }

    /// Roll the transaction back.
    pub fn rollback(mut self) -> Result<()> {
        self.done = true;
        self.conn.exec("rollback")?;
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        self.conn
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done && self.conn.is_alive() {
            let _ = self.conn.exec("rollback");
        }
    }
}
