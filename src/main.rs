fn main() {
    quotawatch::run();
}
