use cotizador_core::domain::quotation::UserId;
use cotizador_db::{connect_with_config, migrations, SqlQuotationRepository};

use crate::commands::{
    current_thread_runtime, load_config, CommandResult, EXIT_DATABASE, EXIT_INPUT, EXIT_MIGRATION,
};

/// Reports the folio `user` would receive next. Nothing is reserved.
pub fn run(user: &str) -> CommandResult {
    let user = user.trim();
    if user.is_empty() {
        return CommandResult::failure("next-folio", "input", "user must not be empty", EXIT_INPUT);
    }

    let config = match load_config("next-folio") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("next-folio") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

        let repository = SqlQuotationRepository::new(pool.clone());
        let allocation = config
            .folio
            .allocator()
            .allocate(&repository, &UserId(user.to_string()), None)
            .await
            .map_err(|error| ("allocation", error.to_string(), EXIT_DATABASE));
        pool.close().await;
        allocation
    });

    match result {
        Ok(allocation) => CommandResult::success("next-folio", allocation.folio),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("next-folio", error_class, message, exit_code)
        }
    }
}
