mod escalator;
mod quality;
