use std::process::ExitCode;

use rayon::prelude::*;
use serde::Serialize;

use toy::Script;

#[derive(Serialize)]
struct ErrorReport<'a> {
    file: &'a str,
    line: u32,
    column: u32,
    message: &'a str,
}

fn usage() -> ExitCode {
    eprintln!("usage: toy [run|disasm] [--json-errors] <file.toy>...");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let json_errors = args.iter().any(|a| a == "--json-errors");
    args.retain(|a| a != "--json-errors");

    let (command, files) = match args.split_first() {
        Some((first, rest)) if first == "run" || first == "disasm" => {
            (first.clone(), rest.to_vec())
        }
        Some(_) => ("run".to_string(), args),
        None => return usage(),
    };
    if files.is_empty() {
        return usage();
    }

    let ok = match command.as_str() {
        "disasm" => files.iter().all(|file| disasm_file(file, json_errors)),
        _ => {
            // Each file gets its own compiler and VM; instances share
            // nothing, so they run in parallel.
            files
                .par_iter()
                .map(|file| run_file(file, json_errors))
                .reduce(|| true, |a, b| a && b)
        }
    };

    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn load_script(path: &str) -> Result<Script, String> {
    let source =
        std::fs::read_to_string(path).map_err(|err| format!("cannot read {}: {}", path, err))?;
    Ok(Script::new(source).with_file(path))
}

fn report_compile_error(err: &toy::CompileError, json_errors: bool) {
    if json_errors {
        let report = ErrorReport {
            file: &err.file,
            line: err.pos.line,
            column: err.pos.column,
            message: &err.message,
        };
        match serde_json::to_string(&report) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("{}", err),
        }
    } else {
        eprintln!("{}", err);
    }
}

fn run_file(path: &str, json_errors: bool) -> bool {
    let script = match load_script(path) {
        Ok(script) => script,
        Err(err) => {
            eprintln!("{}", err);
            return false;
        }
    };
    let mut compiled = match script.compile() {
        Ok(compiled) => compiled,
        Err(err) => {
            report_compile_error(&err, json_errors);
            return false;
        }
    };
    match compiled.run() {
        Ok(()) => true,
        Err(err) => {
            eprintln!("{}", err);
            false
        }
    }
}

fn disasm_file(path: &str, json_errors: bool) -> bool {
    let script = match load_script(path) {
        Ok(script) => script,
        Err(err) => {
            eprintln!("{}", err);
            return false;
        }
    };
    match script.compile() {
        Ok(compiled) => {
            println!("== {} ==", path);
            print!("{}", compiled.bytecode().format_instructions());
            println!("== constants ==");
            print!("{}", compiled.bytecode().format_constants());
            true
        }
        Err(err) => {
            report_compile_error(&err, json_errors);
            false
        }
    }
}
