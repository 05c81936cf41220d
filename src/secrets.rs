use std::collections::{BTreeSet, HashMap};

use anyhow::{Context as _, Result, bail};
use aws_sdk_ssm::client::Client;
use tracing::debug;

type ParameterName = String;
type ParameterValue = String;

const SSM_SCHEME: &str = "ssm://";
// GetParameters accepts at most 10 names per call.
const MAX_NAMES_PER_CALL: usize = 10;

/// Replaces every `ssm://{name}` value with the SSM parameter's decrypted value.
/// Values without the scheme are left untouched and no AWS call is made when none has it.
pub async fn resolve_ssm_refs(values: Vec<&mut String>) -> Result<()> {
    let names = parameter_names(&values);
    if names.is_empty() {
        return Ok(());
    }
    let fetched = fetch(names).await.with_context(|| "fetching from AWS SSM failed")?;
    replace(values, &fetched)
}

fn parameter_name(value: &str) -> Option<&str> {
    value.strip_prefix(SSM_SCHEME)
}

fn parameter_names(values: &[&mut String]) -> Vec<ParameterName> {
    values
        .iter()
        .filter_map(|v| parameter_name(v))
        .map(ToOwned::to_owned)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn replace(
    values: Vec<&mut String>,
    fetched: &HashMap<ParameterName, ParameterValue>,
) -> Result<()> {
    for value in values {
        let Some(name) = parameter_name(value) else {
            continue;
        };
        let resolved = fetched
            .get(name)
            .with_context(|| format!("no value fetched for {name}"))?;
        *value = resolved.clone();
    }
    Ok(())
}

async fn fetch(names: Vec<ParameterName>) -> Result<HashMap<ParameterName, ParameterValue>> {
    debug!("fetching SSM values for names: {}", names.join(", "));

    let config = aws_config::load_from_env().await;
    let client = Client::new(&config);
    let mut fetched = HashMap::with_capacity(names.len());
    for chunk in names.chunks(MAX_NAMES_PER_CALL) {
        let res = client
            .get_parameters()
            .set_names(Some(chunk.to_vec()))
            .with_decryption(true)
            .send()
            .await?;
        if let Some(invalid) = res.invalid_parameters.filter(|p| !p.is_empty()) {
            bail!("invalid SSM parameters: {}", invalid.join(", "));
        }
        let parameters = res.parameters.with_context(|| "no parameter fetched")?;
        fetched.extend(parameters.into_iter().flat_map(|p| p.name.zip(p.value)));
    }
    Ok(fetched)
}
