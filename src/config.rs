/// Runtime configuration, environment-driven with working defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote movie catalog API.
    pub api_url: String,
    /// Address the front-end binds to.
    pub addr: String,
    /// Path of the sled database backing the local mirror.
    pub data_path: String,
    /// Result limit passed to the filter endpoints.
    pub fetch_limit: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_url: var_or(
                "MOVIEVILLA_API_URL",
                "https://movie-handler-api.onrender.com/api",
            ),
            addr: var_or("MOVIEVILLA_ADDR", "127.0.0.1:8080"),
            data_path: var_or("MOVIEVILLA_DATA", "movievilla-data"),
            fetch_limit: var_or("MOVIEVILLA_LIMIT", "50").parse().unwrap_or(50),
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        assert_eq!(var_or("MOVIEVILLA_TEST_UNSET_VAR", "fallback"), "fallback");
        let config = Config::from_env();
        assert!(config.fetch_limit > 0);
        assert!(!config.api_url.is_empty());
    }
}
