fn main() {
    kingfisher::run_cli();
}
