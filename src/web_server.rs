use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::{SandboxConfig, ServerConfig};
use crate::judge::Judge;
use crate::pipeline::ExecutionPipeline;
use crate::routes::{
    compilers_handler, health_handler, json_error_handler, languages_handler, limits_handler,
    run_handler, stats_handler, submit_function_handler, submit_handler,
};

/// Request bodies carry source plus every test case, so allow more than the 2 MiB default
const JSON_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Registers every route; shared state is attached by the caller with `app_data`
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(JSON_BODY_LIMIT)
            .error_handler(json_error_handler),
    )
    .service(run_handler)
    .service(submit_handler)
    .service(submit_function_handler)
    .service(languages_handler)
    .service(limits_handler)
    .service(stats_handler)
    .service(health_handler)
    .service(compilers_handler);
}

pub fn build_server(
    server_config: ServerConfig,
    sandbox_config: SandboxConfig,
    pipeline: ExecutionPipeline,
    judge: Judge,
) -> std::io::Result<Server> {
    let pipeline = web::Data::new(pipeline);
    let judge = web::Data::new(judge);
    let sandbox_config = web::Data::new(sandbox_config);

    let address = server_config
        .bind_address
        .unwrap_or("127.0.0.1".to_string());
    let port = server_config.bind_port.unwrap_or(12345);
    log::info!("Listening on {address}:{port}");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(pipeline.clone())
            .app_data(judge.clone())
            .app_data(sandbox_config.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_services)
    })
    .bind((address, port))?
    .run();

    Ok(server)
}
