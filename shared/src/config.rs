use serde::Deserialize;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ListenerError {
    #[error("port cannot be 0")]
    InvalidPort,
    #[error("host cannot be empty")]
    EmptyHost,
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Listener {
            host: host.into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<(), ListenerError> {
        if self.host.trim().is_empty() {
            return Err(ListenerError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ListenerError::InvalidPort);
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener() {
        let listener: Listener = serde_yaml::from_str("{host: 0.0.0.0, port: 8080}").unwrap();
        assert_eq!(listener, Listener::new("0.0.0.0", 8080));
        assert_eq!(listener.addr(), "0.0.0.0:8080");
        assert!(listener.validate().is_ok());

        assert_eq!(
            Listener::new("127.0.0.1", 0).validate(),
            Err(ListenerError::InvalidPort)
        );
        assert_eq!(
            Listener::new(" ", 3000).validate(),
            Err(ListenerError::EmptyHost)
        );

        // Missing port
        assert!(serde_yaml::from_str::<Listener>("{host: 0.0.0.0}").is_err());
    }
}
