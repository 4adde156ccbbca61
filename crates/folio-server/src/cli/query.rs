use crate::cli::QueryArgs;
use crate::config::FolioConfig;
use anyhow::Result;
use folio_client::CmsClient;
use folio_core::{ContentCache, FetchStatus, QueryParams};

pub async fn run(args: QueryArgs, config: &FolioConfig) -> Result<()> {
    let client = CmsClient::new(config.cms_config())?;
    let cache = ContentCache::new(client, config.cache_config());

    let params: QueryParams = args.params.into_iter().collect();
    let fetched = cache.fetch(&args.query, Some(&params)).await;
    let status = fetched.status();

    let Some(data) = fetched.into_data() else {
        anyhow::bail!("No data: the CMS query failed (see log output for the cause)");
    };

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string(&*data)?),
        _ => {
            println!("{}", serde_json::to_string_pretty(&*data)?);
            if status == FetchStatus::Stale {
                eprintln!("(stale)");
            }
        }
    }

    Ok(())
}
