//! Network Shell: a line-oriented TCP front end to the `Coordinator`. Each
//! connection gets its own OS thread and its own `Session`/`Executor` pair;
//! all of them share the one `Coordinator` (and therefore the one
//! concurrency-control manager and recovery log) behind an `Arc`.
//!
//! The wire format is deliberately the simplest thing that can drive a SQL
//! session over `nc`/`telnet`: statements are newline-free free text,
//! terminated by a semicolon, read until one is seen. The prompt echoes
//! `dbms>` normally and `dbms*>` while a transaction is open, so a human at
//! the other end can tell at a glance whether `COMMIT`/`ROLLBACK` is live.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use log::{error, info};

use crate::coordinator::{Coordinator, Session};
use crate::executor::Executor;
use crate::types::QueryResult;

pub const DEFAULT_PORT: u16 = 5433;

pub struct Shell {
    coordinator: Arc<Coordinator>,
    bind_addr: String,
}

impl Shell {
    pub fn new(coordinator: Arc<Coordinator>, bind_addr: String) -> Self {
        Self { coordinator, bind_addr }
    }

    /// Accepts connections until the listener errors out. Each connection is
    /// handled on its own thread; a panic or I/O error in one connection's
    /// thread never brings down the listener or any other connection.
    pub fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr)?;
        info!("bedrockdb listening on {}", self.bind_addr);

        for incoming in listener.incoming() {
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                    continue;
                }
            };
            let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "<unknown>".to_string());
            if let Err(e) = stream.set_nodelay(true) {
                error!("failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            let coordinator = Arc::clone(&self.coordinator);
            std::thread::spawn(move || {
                info!("client connected: {}", peer);
                if let Err(e) = handle_connection(stream, &coordinator) {
                    error!("connection error from {}: {}", peer, e);
                }
                info!("client disconnected: {}", peer);
            });
        }
        Ok(())
    }
}

/// A single client connection's read-statement/execute/write-reply loop.
/// Statements accumulate across reads until a `;` is seen, so a multi-line
/// paste works the same as a single `nc` line.
fn handle_connection(stream: TcpStream, coordinator: &Arc<Coordinator>) -> std::io::Result<()> {
    static NEXT_CLIENT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
    let client_id = NEXT_CLIENT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let executor = Executor::new(coordinator);
    let mut session = Session::new(client_id);
    let mut pending = String::new();

    write_prompt(&mut writer, &session)?;
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break; // EOF: client closed the connection.
        }
        pending.push_str(&line);

        if let Some(stmt) = take_statement(&mut pending) {
            if stmt.eq_ignore_ascii_case("quit") || stmt.eq_ignore_ascii_case("exit") {
                break;
            }
            if stmt.is_empty() {
                write_prompt(&mut writer, &session)?;
                continue;
            }
            match executor.execute(&stmt, &mut session) {
                Ok(result) => write_result(&mut writer, &result)?,
                Err(e) => writeln!(writer, "ERROR: {}", e)?,
            }
            write_prompt(&mut writer, &session)?;
        }
    }
    Ok(())
}

/// Pulls the first complete `;`-terminated statement out of `buf`, leaving
/// whatever comes after the `;` for the next round. Returns `None` until a
/// terminator shows up.
fn take_statement(buf: &mut String) -> Option<String> {
    let idx = buf.find(';')?;
    let rest = buf.split_off(idx + 1);
    let mut stmt = std::mem::replace(buf, rest);
    stmt.pop(); // drop the trailing ';'
    Some(stmt.trim().to_string())
}

fn write_prompt(writer: &mut impl Write, session: &Session) -> std::io::Result<()> {
    let prompt = if session.in_transaction() { "dbms*> " } else { "dbms> " };
    write!(writer, "{}", prompt)?;
    writer.flush()
}

fn write_result(writer: &mut impl Write, result: &QueryResult) -> std::io::Result<()> {
    match result {
        QueryResult::Select(rs) => {
            writeln!(writer, "{}", rs.columns.join("\t"))?;
            for row in &rs.rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                writeln!(writer, "{}", cells.join("\t"))?;
            }
            writeln!(writer, "({} row{})", rs.rows.len(), if rs.rows.len() == 1 { "" } else { "s" })
        }
        QueryResult::Modified { rows_affected } => {
            writeln!(writer, "OK, {} row{} affected", rows_affected, if *rows_affected == 1 { "" } else { "s" })
        }
        QueryResult::Ok => writeln!(writer, "OK"),
        QueryResult::TransactionStarted => writeln!(writer, "BEGIN"),
        QueryResult::TransactionCommitted => writeln!(writer, "COMMIT"),
        QueryResult::TransactionRolledBack => writeln!(writer, "ROLLBACK"),
    }
}
