//! An error from the rescheduler

/// An error from the rescheduler
#[derive(Debug)]
pub enum Error {
    /// A generic error with a message
    Generic(String),
    /// An error from the k8s client
    K8s(kube::Error),
    /// An error from loading a kubeconfig
    K8sConfig(kube::config::KubeconfigError),
    /// An error from converting a value with serde
    Serde(serde_json::Error),
    /// An IO Error
    IO(std::io::Error),
    /// An error from using a regex
    Regex(regex::Error),
    /// An error from parsing an int
    ParseInt(std::num::ParseIntError),
    /// An error from registering or encoding metrics
    Prometheus(prometheus::Error),
}

impl Error {
    /// Create a new generic error
    ///
    /// # Arguments
    ///
    /// * `msg` - The error message to set
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Get the status code from this error if one exists
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::K8s(kube::Error::Api(resp)) => Some(resp.code),
            _ => None,
        }
    }

    /// Get the error message for this error if one exists
    pub fn msg(&self) -> Option<String> {
        match self {
            Error::Generic(msg) => Some(msg.clone()),
            Error::K8s(err) => Some(err.to_string()),
            Error::K8sConfig(err) => Some(err.to_string()),
            Error::Serde(err) => Some(err.to_string()),
            Error::IO(err) => Some(err.to_string()),
            Error::Regex(err) => Some(err.to_string()),
            Error::ParseInt(err) => Some(err.to_string()),
            Error::Prometheus(err) => Some(err.to_string()),
        }
    }

    /// get the kind of error as a str
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Generic(_) => "Generic",
            Error::K8s(_) => "K8s",
            Error::K8sConfig(_) => "K8sConfig",
            Error::Serde(_) => "Serde",
            Error::IO(_) => "IO",
            Error::Regex(_) => "Regex",
            Error::ParseInt(_) => "ParseInt",
            Error::Prometheus(_) => "Prometheus",
        }
    }
}

impl std::fmt::Display for Error {
    /// display this error in an easy readable format
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match (self.status(), self.msg()) {
            (Some(code), Some(msg)) => write!(f, "Code: {} Error: {}", code, msg),
            (None, Some(msg)) => write!(f, "Error: {}", msg),
            (Some(code), None) => write!(f, "Code: {}", code),
            (None, None) => write!(f, "Kind: {}", self.kind()),
        }
    }
}

// mark that this is an error struct
impl std::error::Error for Error {}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::K8s(error)
    }
}

impl From<kube::config::KubeconfigError> for Error {
    fn from(error: kube::config::KubeconfigError) -> Self {
        Error::K8sConfig(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}

impl From<regex::Error> for Error {
    fn from(error: regex::Error) -> Self {
        Error::Regex(error)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(error: std::num::ParseIntError) -> Self {
        Error::ParseInt(error)
    }
}

impl From<prometheus::Error> for Error {
    fn from(error: prometheus::Error) -> Self {
        Error::Prometheus(error)
    }
}
