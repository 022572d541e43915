//! The interactive shell.
//!
//! A line-oriented REPL over the client API. Lines are either commands or
//! variable bindings `name = command`; `$name` tokens substitute the bound
//! value into later commands, so a script can thread query ids and file
//! references through a session:
//!
//!   q = query ancestor(bill, Y)
//!   wait $q
//!   answers $q

use crate::client::RpcClient;
use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use etb_core::wire::{Method, ResponseData};
use etb_core::FileRef;
use owo_colors::OwoColorize;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::Path;

const THIN_SEP: &str = "------------------------------------------------------------";

pub struct Repl {
    client: RpcClient,
    vars: HashMap<String, String>,
}

/// `name = expr` detection; name must be a plain identifier.
pub fn split_binding(line: &str) -> Option<(&str, &str)> {
    let (name, expr) = line.split_once('=')?;
    let name = name.trim();
    let expr = expr.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    // "p(X) = ..." is not a binding, and neither is "x == y"
    if valid && !expr.is_empty() && !expr.starts_with('=') {
        Some((name, expr))
    } else {
        None
    }
}

/// Replace `$name` occurrences with bound values, longest names first.
pub fn substitute_vars(text: &str, vars: &HashMap<String, String>) -> String {
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    let mut out = text.to_string();
    for name in names {
        out = out.replace(&format!("${}", name), &vars[name]);
    }
    out
}

impl Repl {
    pub fn new(client: RpcClient) -> Self {
        Repl {
            client,
            vars: HashMap::new(),
        }
    }

    pub async fn run_interactive(&mut self) -> Result<()> {
        println!();
        println!("{}", "  etbsh - evidential tool bus shell".bold());
        println!("{}", THIN_SEP);
        println!("  Type 'help' for commands, 'quit' to leave.");
        println!();
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("etb> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next() else { break };
            let line = line?;
            match self.execute(&line).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("  {} {}", "[!]".yellow(), e),
            }
        }
        Ok(())
    }

    /// Execute a script file line by line; a failing line aborts the run.
    pub async fn run_script(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        for line in text.lines() {
            if !self.execute(line).await? {
                break;
            }
        }
        Ok(())
    }

    /// Returns false when the session should end.
    pub async fn execute(&mut self, line: &str) -> Result<bool> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
            return Ok(true);
        }
        if let Some((name, expr)) = split_binding(line) {
            let name = name.to_owned();
            if let Some(value) = self.run_command(expr).await? {
                self.vars.insert(name, value);
            }
            return Ok(true);
        }
        if matches!(line, "quit" | "exit") {
            return Ok(false);
        }
        self.run_command(line).await?;
        Ok(true)
    }

    /// Run one command; the returned string is what a binding would store.
    async fn run_command(&mut self, line: &str) -> Result<Option<String>> {
        let line = substitute_vars(line, &self.vars);
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line.as_str(), ""),
        };
        match command {
            "help" => {
                self.print_help();
                Ok(None)
            }
            "query" => {
                if rest.is_empty() {
                    bail!("usage: query <goal>");
                }
                match self.client.call(Method::Query { goal: rest.into() }).await? {
                    ResponseData::QueryId { query } => {
                        println!("  {} query {}", "[*]".green(), query);
                        Ok(Some(query))
                    }
                    other => bail!("unexpected reply: {:?}", other),
                }
            }
            "wait" => {
                let query = one_arg(rest, "wait <query>")?;
                self.client.call(Method::QueryWait { query }).await?;
                println!("  {} completed", "[*]".green());
                Ok(None)
            }
            "done" => {
                let query = one_arg(rest, "done <query>")?;
                match self.client.call(Method::QueryDone { query }).await? {
                    ResponseData::Done { done } => {
                        println!("  {} {}", "[*]".green(), if done { "done" } else { "active" });
                        Ok(Some(done.to_string()))
                    }
                    other => bail!("unexpected reply: {:?}", other),
                }
            }
            "answers" => {
                let query = one_arg(rest, "answers <query>")?;
                match self.client.call(Method::QueryAnswers { query }).await? {
                    ResponseData::Answers { answers } => {
                        if answers.is_empty() {
                            println!("  {} no answers", "[*]".green());
                        }
                        for answer in &answers {
                            println!("  {}", answer);
                        }
                        Ok(Some(serde_json::to_string(&answers)?))
                    }
                    other => bail!("unexpected reply: {:?}", other),
                }
            }
            "claims" | "errors" => {
                let query = one_arg(rest, "claims <query>")?;
                let method = if command == "claims" {
                    Method::QueryClaims { query }
                } else {
                    Method::QueryErrors { query }
                };
                self.print_claims(method).await
            }
            "all_claims" => self.print_claims(Method::GetAllClaims).await,
            "close" => {
                let query = one_arg(rest, "close <query>")?;
                self.client.call(Method::QueryClose { query }).await?;
                println!("  {} closed", "[*]".green());
                Ok(None)
            }
            "active" | "finished" => {
                let method = if command == "active" {
                    Method::ActiveQueries
                } else {
                    Method::DoneQueries
                };
                match self.client.call(method).await? {
                    ResponseData::Queries { queries } => {
                        for query in &queries {
                            println!("  {}", query);
                        }
                        println!("  {} {} queries", "[*]".green(), queries.len());
                        Ok(None)
                    }
                    other => bail!("unexpected reply: {:?}", other),
                }
            }
            "put" => {
                let mut parts = rest.split_whitespace();
                let Some(source) = parts.next() else {
                    bail!("usage: put <local-file> [dest-path]");
                };
                let dest = parts.next().unwrap_or(source).to_owned();
                let bytes = std::fs::read(source)?;
                match self
                    .client
                    .call(Method::PutFile {
                        path: dest,
                        contents: BASE64.encode(&bytes),
                    })
                    .await?
                {
                    ResponseData::File(fileref) => {
                        let json = serde_json::to_string(&fileref)?;
                        println!("  {} {}", "[*]".green(), json);
                        Ok(Some(json))
                    }
                    other => bail!("unexpected reply: {:?}", other),
                }
            }
            "get" => {
                // get <fileref-json> [out-path]
                let (fileref_text, out) = match rest.rfind('}') {
                    Some(end) => {
                        let (json, tail) = rest.split_at(end + 1);
                        (json, tail.trim())
                    }
                    None => bail!("usage: get {{\"file\": ..., \"sha1\": ...}} [out-path]"),
                };
                let fileref: FileRef = serde_json::from_str(fileref_text)?;
                match self.client.call(Method::GetFile { file: fileref.clone() }).await? {
                    ResponseData::FileContents { contents } => {
                        let bytes = BASE64.decode(contents.as_bytes())?;
                        let out = if out.is_empty() { &fileref.file } else { out };
                        if let Some(parent) = Path::new(out).parent() {
                            if !parent.as_os_str().is_empty() {
                                std::fs::create_dir_all(parent)?;
                            }
                        }
                        std::fs::write(out, &bytes)?;
                        println!("  {} wrote {} bytes to {}", "[*]".green(), bytes.len(), out);
                        Ok(Some(out.to_string()))
                    }
                    other => bail!("unexpected reply: {:?}", other),
                }
            }
            "ls" => {
                match self.client.call(Method::Ls { dir: rest.into() }).await? {
                    ResponseData::Listing(listing) => {
                        for (label, entries) in [
                            ("dirs", &listing.dirs),
                            ("in-sync", &listing.in_sync),
                            ("outdated", &listing.outdated),
                            ("untracked", &listing.untracked),
                        ] {
                            for entry in entries {
                                println!("  {:10} {}", label, entry);
                            }
                        }
                        Ok(None)
                    }
                    other => bail!("unexpected reply: {:?}", other),
                }
            }
            "connect" => {
                let mut parts = rest.split_whitespace();
                let (Some(host), Some(port)) = (parts.next(), parts.next()) else {
                    bail!("usage: connect <host> <port>");
                };
                let port: u16 = port.parse()?;
                self.client
                    .call(Method::Connect {
                        host: host.into(),
                        port,
                    })
                    .await?;
                println!("  {} connected", "[*]".green());
                Ok(None)
            }
            "tunnel" => {
                let mut parts = rest.split_whitespace();
                let (Some(local), Some(remote)) = (parts.next(), parts.next()) else {
                    bail!("usage: tunnel <local-port> <remote-port>");
                };
                self.client
                    .call(Method::Tunnel {
                        local_port: local.parse()?,
                        remote_port: remote.parse()?,
                    })
                    .await?;
                println!("  {} tunnel installed", "[*]".green());
                Ok(None)
            }
            other => bail!("unknown command '{}'; try 'help'", other),
        }
    }

    async fn print_claims(&mut self, method: Method) -> Result<Option<String>> {
        match self.client.call(method).await? {
            ResponseData::Claims { claims } => {
                if claims.is_empty() {
                    println!("  {} no claims", "[*]".green());
                }
                for claim in &claims {
                    println!("  {}", claim);
                }
                Ok(Some(serde_json::to_string(&claims)?))
            }
            other => bail!("unexpected reply: {:?}", other),
        }
    }

    fn print_help(&self) {
        println!("{}", THIN_SEP);
        println!("  query <goal>            admit a goal, prints the query id");
        println!("  wait <q> / done <q>     block until / test completion");
        println!("  answers <q>             substitutions of a query");
        println!("  claims <q> / errors <q> claims (or error claims) of a query");
        println!("  all_claims              every claim on the node");
        println!("  close <q>               close a query");
        println!("  active / finished       list queries by state");
        println!("  put <file> [dest]       upload a file, prints its reference");
        println!("  get <ref-json> [out]    download a blob by reference");
        println!("  ls [dir]                classify the node working tree");
        println!("  connect <host> <port>   join a fabric");
        println!("  tunnel <local> <remote> join through a port-forwarding relay");
        println!("  name = <command>        bind a result; use $name later");
        println!("  quit");
        println!("{}", THIN_SEP);
    }
}

fn one_arg(rest: &str, usage: &str) -> Result<String> {
    let arg = rest.trim();
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        bail!("usage: {}", usage);
    }
    Ok(arg.to_owned())
}
