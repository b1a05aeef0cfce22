use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

use crate::error::Error;
use crate::libs::nodes::Resources;

/// Bounds checks a cpu value and converts it to millicpu
///
/// # Arguments
///
/// * `raw` - Raw cpu value
pub fn cpu(raw: Option<&Quantity>) -> Result<u64, Error> {
    // if raw is None then return 0
    let raw = match raw {
        Some(raw) => &raw.0,
        None => return Ok(0),
    };
    // try to cast this directly to a f64
    // This is because we assume that any f64 value is # of cores
    // if parse was successful then convert to millicpu
    if let Ok(cores) = raw.parse::<f64>() {
        return Ok((cores * 1000.0).ceil() as u64);
    }
    // f64 parse failed check if it ends in a millicpu unit
    if let Some(milli) = raw.strip_suffix('m') {
        return milli
            .parse::<u64>()
            .map_err(|_| Error::new(format!("Invalid cpu value: {raw}")));
    }
    // error if all of the cpu handlers failed
    Err(Error::new(format!("Failed to parse cpu value: {raw}")))
}

/// Converts a memory value to mebibytes
///
/// # Arguments
///
/// * `raw` - Raw memory value
pub fn memory(raw: Option<&Quantity>) -> Result<u64, Error> {
    // if raw is None then return 0
    let raw = match raw {
        Some(raw) => &raw.0,
        None => return Ok(0),
    };
    // try to cast this directly to a u64
    // This is because we assume that any u64 value is # of bytes
    if let Ok(bytes) = raw.parse::<u64>() {
        // convert bytes to mebibytes
        return Ok((bytes as f64 / 1.049e+6).ceil() as u64);
    }
    // u64 parse failed so find the first occurrence of a valid unit char
    let unit_regex = Regex::new(r"[KMGTPE]")?;
    // find index where unit starts
    let reg = match unit_regex.find(raw) {
        Some(reg) => reg,
        None => return Err(Error::new(format!("Failed to parse memory value: {raw}"))),
    };
    // split raw based on where unit was found
    let (amt, unit) = raw.split_at(reg.start());
    // cast amt to u64
    let amt = amt.parse::<u64>()?;
    // convert to mebibytes
    let mebibytes = match unit {
        "K" => amt / 1049,
        "M" => (amt as f64 / 1.049).ceil() as u64,
        "G" => amt * 954,
        "T" => amt * 953_674,
        "P" => (amt as f64 * 9.537e+8).ceil() as u64,
        "E" => (amt as f64 * 9.537e+11).ceil() as u64,
        "Ki" => amt / 1024,
        "Mi" => amt,
        "Gi" => amt * 1024,
        "Ti" => (amt as f64 * 1.049e+6).ceil() as u64,
        "Pi" => (amt as f64 * 1.074e+9).ceil() as u64,
        "Ei" => (amt as f64 * 1.1e+12).ceil() as u64,
        _ => {
            return Err(Error::new(format!(
                "Failed to parse memory value: {raw}"
            )))
        }
    };
    Ok(mebibytes)
}

/// Sum the container resource requests of a pod
///
/// # Arguments
///
/// * `pod` - The pod to sum requests for
pub fn pod_requests(pod: &Pod) -> Result<Resources, Error> {
    let mut total = Resources::default();
    if let Some(spec) = &pod.spec {
        // crawl over the resource requests for containers in this pod
        for requests in spec
            .containers
            .iter()
            .filter_map(|cont| cont.resources.as_ref())
            .filter_map(|res| res.requests.as_ref())
        {
            total.cpu += cpu(requests.get("cpu"))?;
            total.memory += memory(requests.get("memory"))?;
        }
    }
    Ok(total)
}

/// Returns a pods namespace/name as a single id
///
/// # Arguments
///
/// * `pod` - The pod to get an id for
pub fn pod_id(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod.metadata.name.as_deref().unwrap_or("unknown")
    )
}
