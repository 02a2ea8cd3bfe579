const BANNER: &str = r#"
  _                   _           _
 | |_ __ _ _ __ ___  | |__   __ _| |
 | __/ _` | '_ ` _ \ | '_ \ / _` | |
 | || (_| | | | | | || |_) | (_| | |
  \__\__,_|_| |_| |_||_.__/ \__,_|_|
"#;

pub fn welcome_message(title: &str) -> String {
    format!(
        "{}\n  {} v{}\n  Salvages rows from damaged SQLite databases. Type 'help' for commands.\n",
        BANNER,
        title,
        env!("CARGO_PKG_VERSION")
    )
}
