use dagbft::Dagbft;
use dagbft_util_error::WhateverResult;

#[tokio::main]
#[snafu::report]
async fn main() -> WhateverResult<()> {
    Dagbft::builder().run().await?;
    Ok(())
}
