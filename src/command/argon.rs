use argh::FromArgs;

use crate::command::Error;
use crate::source::db::hash_password;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "argon",
    description = "Hash a password following the argon2id algorithm"
)]
pub struct Options {}

pub struct Command {}

impl Command {
    pub fn run() -> Result<(), Error> {
        let password = rpassword::prompt_password("Input Password: ")?;
        let hash = hash_password(&password)?;
        println!("{hash}");
        Ok(())
    }
}
