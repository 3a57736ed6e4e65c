//! Request handling: body -> program -> resolved -> executed -> response.

use crate::config::Settings;
use crate::error::ServerError;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use corevm::machine::Interpreter;
use corevm::resolver::Resolver;
use corevm::types::{Type, TypeRef};
use corevm_cli::syntax;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Serialize)]
struct RunResult {
    output: Vec<String>,
}

/// Splits the `##INPUT <text>` request framing the original system used
/// (`Server.cpp::ParseRequest`, restored per SPEC_FULL.md): an optional
/// first line naming the program's input buffer, with the remainder of the
/// body treated as source. A body with no such line is all source with an
/// empty input buffer.
fn split_input_frame(body: &str) -> (&str, &str) {
    match body.strip_prefix("##INPUT ") {
        Some(rest) => match rest.find('\n') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        },
        None => ("", body),
    }
}

/// Registers the ccalls a request's program can reach for: `print(...)`,
/// a variadic sink appended to the response's `output` list, and `read()`,
/// which pops one whitespace-separated integer off the input buffer each
/// call (spec.md's `##INPUT` stdin, §6).
fn register_ccalls(
    resolver: &mut Resolver,
    output: Rc<RefCell<Vec<String>>>,
    input: Rc<RefCell<std::vec::IntoIter<i64>>>,
) {
    resolver.register_ccall("print", Vec::new(), None, true, move |frame| {
        let mut values = Vec::new();
        for chunk in frame.chunks_exact(16) {
            let tag = i64::from_le_bytes(chunk[0..8].try_into().unwrap());
            let bytes: [u8; 8] = chunk[8..16].try_into().unwrap();
            values.push(match tag {
                0 => i64::from_le_bytes(bytes).to_string(),
                1 => f64::from_le_bytes(bytes).to_string(),
                2 => (bytes[0] != 0).to_string(),
                3 => (bytes[0] as char).to_string(),
                4 => format!("0x{:x}", u64::from_le_bytes(bytes)),
                _ => format!("<{} bytes>", u64::from_le_bytes(bytes)),
            });
        }
        values.reverse();
        output.borrow_mut().push(values.join(" "));
    });

    let int_ty: TypeRef = Rc::new(Type::integer());
    resolver.register_ccall("read", Vec::new(), Some(int_ty), false, move |frame| {
        let next = input.borrow_mut().next().unwrap_or(0);
        frame[0..8].copy_from_slice(&next.to_le_bytes());
    });
}

fn run_request(settings: &Settings, body: &[u8]) -> Result<RunResult, ServerError> {
    let text = String::from_utf8_lossy(body);
    let (input_text, source) = split_input_frame(&text);

    let program = syntax::parse_program(source).map_err(|e| ServerError::Parse(e.to_string()))?;

    let input_values: Vec<i64> = input_text
        .split_whitespace()
        .filter_map(|tok| tok.parse().ok())
        .collect();
    let output = Rc::new(RefCell::new(Vec::new()));
    let input = Rc::new(RefCell::new(input_values.into_iter()));

    let mut resolver = Resolver::create();
    register_ccalls(&mut resolver, Rc::clone(&output), input);
    let resolved = resolver.resolve(&program, source).map_err(ServerError::Resolve)?;

    let mut machine = Interpreter::new(&resolved, settings.stack_bytes, settings.cycle_limit);
    machine.run().map_err(ServerError::Runtime)?;

    Ok(RunResult {
        output: Rc::try_unwrap(output)
            .expect("no other Rc to the output log survives past run()")
            .into_inner(),
    })
}

fn run(settings: web::Data<Settings>, body: web::Bytes) -> Result<HttpResponse, ServerError> {
    let result = run_request(&settings, &body)?;
    Ok(HttpResponse::Ok().json(result))
}

pub async fn run_server(settings: Settings) -> std::io::Result<()> {
    let bind_addr = settings.server_host.clone();
    HttpServer::new(move || {
        App::new()
            .data(settings.clone())
            .wrap(middleware::Logger::default())
            .service(web::resource("/run").route(web::post().to(run)))
    })
    .bind(bind_addr)?
    .run()
    .await
}
